//! Object upload and download through the verification pipeline.

#[cfg(test)]
mod tests {
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::ChecksumAlgorithm;

    use crate::{cleanup_bucket, create_test_bucket, s3_client};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_put_and_get_object() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "putget").await;

        let body = b"hello, s3gate!";
        client
            .put_object()
            .bucket(&bucket)
            .key("greeting.txt")
            .body(ByteStream::from_static(body))
            .content_type("text/plain")
            .send()
            .await
            .expect("put_object");

        let resp = client
            .get_object()
            .bucket(&bucket)
            .key("greeting.txt")
            .send()
            .await
            .expect("get_object");
        assert_eq!(resp.content_type(), Some("text/plain"));
        assert_eq!(resp.content_length(), Some(14));

        let data = resp
            .body
            .collect()
            .await
            .expect("collect body")
            .into_bytes();
        assert_eq!(data.as_ref(), body);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_accept_trailing_checksums() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "checksum").await;

        for (key, algorithm) in [
            ("crc32.bin", ChecksumAlgorithm::Crc32),
            ("crc32c.bin", ChecksumAlgorithm::Crc32C),
            ("sha1.bin", ChecksumAlgorithm::Sha1),
            ("sha256.bin", ChecksumAlgorithm::Sha256),
        ] {
            let payload = vec![b'x'; 200 * 1024];
            client
                .put_object()
                .bucket(&bucket)
                .key(key)
                .checksum_algorithm(algorithm)
                .body(ByteStream::from(payload))
                .send()
                .await
                .unwrap_or_else(|e| panic!("put_object {key}: {e}"));
        }

        let listed = client
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .expect("list_objects_v2");
        assert_eq!(listed.contents().len(), 4);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_wrong_content_md5() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "md5").await;

        let result = client
            .put_object()
            .bucket(&bucket)
            .key("bad.txt")
            .content_md5("XrY7u+Ae7tCTyyK7j1rNww==")
            .body(ByteStream::from_static(b"not hello world"))
            .send()
            .await;
        assert!(result.is_err(), "mismatched Content-MD5 should fail");

        let head = client.head_object().bucket(&bucket).key("bad.txt").send().await;
        assert!(head.is_err(), "rejected object must not be stored");

        cleanup_bucket(&client, &bucket).await;
    }
}
