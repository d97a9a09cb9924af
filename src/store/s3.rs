use anyhow::{Context, Result, bail};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::DateTime;
use std::future::Future;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{GetOutcome, ObjectMetadata, RemoteStore};
use crate::cache::Timestamp;
use crate::config::ResolverConfig;
use crate::error::StoreError;

const NOT_MODIFIED: u16 = 304;

/// Blocking [`RemoteStore`] backed by the AWS S3 SDK.
///
/// Owns a tokio runtime and drives each SDK call to completion on it, so it
/// must be called from plain threads, never from inside an async task.
pub struct S3Store {
    client: Client,
    runtime: Runtime,
}

impl S3Store {
    /// Create a store from resolver configuration and the default AWS credential chain.
    ///
    /// A configured proxy is refused, since the SDK's default HTTP connector
    /// cannot route through one.
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        if let Some(proxy) = &config.proxy {
            bail!(
                "Proxy {} is configured but the S3 transport cannot use it; unset {} to connect directly",
                proxy.url(),
                crate::config::PROXY_HOST_ENV_VAR
            );
        }

        let runtime = build_runtime()?;
        let client = runtime.block_on(create_s3_client(config));
        Ok(S3Store { client, runtime })
    }

    /// The underlying SDK client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run a future on the store's runtime
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("s3resolver-io")
        .build()
        .context("Failed to start async runtime for S3 client")
}

/// Build an SDK client from resolver configuration
pub async fn create_s3_client(config: &ResolverConfig) -> Client {
    let timeouts = aws_config::timeout::TimeoutConfig::builder()
        .connect_timeout(config.connect_timeout)
        .operation_timeout(config.operation_timeout)
        .build();

    let base_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .timeout_config(timeouts)
        .load()
        .await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&base_config);

    if base_config.region().is_none() {
        s3_config_builder = s3_config_builder.region(Region::new(config.default_region.clone()));
    }

    if let Some(endpoint) = &config.endpoint_url {
        debug!("Using S3 endpoint override {endpoint}");
        s3_config_builder = s3_config_builder.endpoint_url(endpoint);
    }

    if config.force_path_style {
        s3_config_builder = s3_config_builder.force_path_style(true);
    }

    Client::from_conf(s3_config_builder.build())
}

fn to_timestamp(date: Option<&DateTime>) -> Timestamp {
    date.map(|d| Timestamp(d.as_secs_f64()))
        .unwrap_or(Timestamp::INVALID)
}

fn request_error<E, R>(operation: &'static str, err: &SdkError<E, R>) -> StoreError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    let message = match err.as_service_error() {
        Some(service) => format!(
            "{} {}",
            service.code().unwrap_or("Unknown"),
            service.message().unwrap_or_default()
        ),
        None => DisplayErrorContext(err).to_string(),
    };
    StoreError::Request { operation, message }
}

impl RemoteStore for S3Store {
    fn head_metadata(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectMetadata, StoreError> {
        let request = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(String::from));

        match self.block_on(request.send()) {
            Ok(resp) => Ok(ObjectMetadata {
                last_modified: to_timestamp(resp.last_modified()),
                content_tag: resp.e_tag().map(String::from),
                size: resp.content_length().map(|n| n as u64),
            }),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    return Err(StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                Err(request_error("HeadObject", &err))
            }
        }
    }

    fn get_content(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        if_modified_since: Option<Timestamp>,
    ) -> Result<GetOutcome, StoreError> {
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(String::from))
            .set_if_modified_since(
                if_modified_since
                    .filter(Timestamp::is_valid)
                    .map(|t| DateTime::from_secs_f64(t.as_secs_f64())),
            );

        self.block_on(async {
            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if err.raw_response().map(|r| r.status().as_u16()) == Some(NOT_MODIFIED) {
                        return Ok(GetOutcome::NotModified);
                    }
                    if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                        return Err(StoreError::NotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        });
                    }
                    return Err(request_error("GetObject", &err));
                }
            };

            let last_modified = to_timestamp(resp.last_modified());
            let content_tag = resp.e_tag().map(String::from);
            let body = match resp.body.collect().await {
                Ok(data) => data.into_bytes(),
                Err(e) => return Err(StoreError::Body(e.to_string())),
            };

            Ok(GetOutcome::Fetched {
                body,
                last_modified,
                content_tag,
            })
        })
    }
}
