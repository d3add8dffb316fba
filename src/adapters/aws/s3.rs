use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

use super::{classify, AwsCloud};
use crate::domain::error::CloudResult;
use crate::domain::ports::ObjectStorePort;

/// Region where buckets must be created without a location constraint
const DEFAULT_BUCKET_REGION: &str = "us-east-1";

#[async_trait]
impl ObjectStorePort for AwsCloud {
    async fn create_bucket(&self, bucket: &str, region: &str) -> CloudResult<()> {
        let mut request = self.s3.create_bucket().bucket(bucket);
        if region != DEFAULT_BUCKET_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| classify("s3:CreateBucket", &format!("bucket {bucket}"), e))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> CloudResult<()> {
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify("s3:PutObject", &format!("object {bucket}/{key}"), e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> CloudResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .s3
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| classify("s3:ListObjectsV2", &format!("bucket {bucket}"), e))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        self.s3
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("s3:DeleteObject", &format!("object {bucket}/{key}"), e))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> CloudResult<()> {
        self.s3
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify("s3:DeleteBucket", &format!("bucket {bucket}"), e))?;
        Ok(())
    }
}
