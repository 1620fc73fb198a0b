//! ACL enforcement seen from clients.

#[cfg(test)]
mod tests {
    use aws_sdk_s3::error::ProvideErrorMetadata;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::{BucketCannedAcl, ObjectCannedAcl};

    use crate::{
        OTHER_ACCESS_KEY, OTHER_SECRET_KEY, cleanup_bucket, create_test_bucket, endpoint_url,
        s3_client, s3_client_with, test_bucket_name,
    };

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_deny_other_users_on_private_bucket() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "private").await;

        let err = s3_client_with(OTHER_ACCESS_KEY, OTHER_SECRET_KEY)
            .put_object()
            .bucket(&bucket)
            .key("intruder.txt")
            .body(ByteStream::from_static(b"nope"))
            .send()
            .await
            .expect_err("denied");
        assert_eq!(err.code(), Some("AccessDenied"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_allow_anonymous_read_of_public_object() {
        let client = s3_client();
        let bucket = test_bucket_name("public");
        client
            .create_bucket()
            .bucket(&bucket)
            .acl(BucketCannedAcl::PublicRead)
            .send()
            .await
            .expect("create_bucket");
        client
            .put_object()
            .bucket(&bucket)
            .key("index.html")
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from_static(b"<h1>hi</h1>"))
            .send()
            .await
            .expect("put_object");

        let url = format!("{}/{bucket}/index.html", endpoint_url());
        let resp = reqwest::get(&url).await.expect("request");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), "<h1>hi</h1>");

        let write = reqwest::Client::new()
            .put(&url)
            .body("defaced")
            .send()
            .await
            .expect("request");
        assert_eq!(write.status(), 403);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_apply_acl_changes_to_later_requests() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "aclchange").await;
        client
            .put_object()
            .bucket(&bucket)
            .key("doc.txt")
            .body(ByteStream::from_static(b"doc"))
            .send()
            .await
            .expect("put_object");

        let url = format!("{}/{bucket}/doc.txt", endpoint_url());
        assert_eq!(reqwest::get(&url).await.expect("request").status(), 403);

        client
            .put_object_acl()
            .bucket(&bucket)
            .key("doc.txt")
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .expect("put_object_acl");
        assert_eq!(reqwest::get(&url).await.expect("request").status(), 200);

        cleanup_bucket(&client, &bucket).await;
    }
}
