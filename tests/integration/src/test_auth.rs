//! Signature verification seen from a client.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aws_sdk_s3::error::ProvideErrorMetadata;
    use aws_sdk_s3::presigning::PresigningConfig;
    use aws_sdk_s3::primitives::ByteStream;

    use crate::{
        ACCESS_KEY, cleanup_bucket, create_test_bucket, endpoint_url, s3_client, s3_client_with,
    };

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_answer_unknown_key_and_wrong_secret_alike() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "auth").await;

        let unknown = s3_client_with("AKIDNOBODY", "whatever")
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .expect_err("unknown key");
        let wrong = s3_client_with(ACCESS_KEY, "not-the-secret")
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .expect_err("wrong secret");

        assert_eq!(unknown.code(), Some("SignatureDoesNotMatch"));
        assert_eq!(unknown.code(), wrong.code());
        assert_eq!(unknown.message(), wrong.message());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_serve_presigned_get() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "presign").await;
        client
            .put_object()
            .bucket(&bucket)
            .key("shared.txt")
            .body(ByteStream::from_static(b"shared"))
            .send()
            .await
            .expect("put_object");

        let presigned = client
            .get_object()
            .bucket(&bucket)
            .key("shared.txt")
            .presigned(PresigningConfig::expires_in(Duration::from_secs(300)).expect("config"))
            .await
            .expect("presign");
        let resp = reqwest::get(presigned.uri()).await.expect("request");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), "shared");

        let tampered = presigned.uri().replace("shared.txt", "other.txt");
        let resp = reqwest::get(&tampered).await.expect("request");
        assert_eq!(resp.status(), 403);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_answer_health_without_credentials() {
        let resp = reqwest::get(format!("{}/_health", endpoint_url()))
            .await
            .expect("request");
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().contains_key("x-amz-request-id"));
    }
}
