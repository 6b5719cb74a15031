//! AWS KMS backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::{
    config::retry::RetryConfig,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::Blob,
};
use tokio::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use super::{KekRef, KeyManagementClient, KmsError};

/// How a KMS service error code is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Retry with backoff.
    Transient,
    /// Wrapped key does not belong to this KEK, or is corrupt.
    Integrity,
    /// Missing key, disabled key, or permission failure.
    Unavailable,
}

/// Classify an AWS KMS error code.
///
/// Unknown codes are treated as [`ErrorClass::Unavailable`] so that they are
/// surfaced immediately instead of being retried.
pub(crate) fn classify_code(code: &str) -> ErrorClass {
    match code {
        "InvalidCiphertextException" | "IncorrectKeyException" => ErrorClass::Integrity,
        "ThrottlingException"
        | "DependencyTimeoutException"
        | "KMSInternalException"
        | "KeyUnavailableException"
        | "LimitExceededException"
        | "ServiceUnavailableException"
        | "RequestTimeoutException" => ErrorClass::Transient,
        _ => ErrorClass::Unavailable,
    }
}

fn classify<E>(kek: &KekRef, err: SdkError<E>) -> KmsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) {
        return KmsError::Transient(DisplayErrorContext(&err).to_string());
    }

    let code = err.code().unwrap_or("Unknown").to_owned();
    match classify_code(&code) {
        ErrorClass::Transient => KmsError::Transient(code),
        ErrorClass::Integrity => KmsError::UnwrapIntegrity {
            kek: kek.to_string(),
        },
        ErrorClass::Unavailable => KmsError::KeyUnavailable {
            kek: kek.to_string(),
            reason: code,
        },
    }
}

/// AWS KMS client wrapping and unwrapping DEKs with `Encrypt` / `Decrypt`.
///
/// The SDK's own retry layer is disabled; retries are owned by
/// [`super::GuardedKms`] so that authorization failures are never retried.
#[derive(Debug)]
pub struct AwsKms {
    client: RwLock<Option<aws_sdk_kms::Client>>,
}

impl AwsKms {
    /// Load AWS configuration from the environment and build the KMS client.
    ///
    /// `endpoint_url` overrides the regional endpoint (VPC endpoints,
    /// LocalStack).
    pub async fn connect(endpoint_url: Option<&str>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let mut builder =
            aws_sdk_kms::config::Builder::from(&config).retry_config(RetryConfig::disabled());
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }

        info!(endpoint_override = endpoint_url.is_some(), "AWS KMS client initialised");
        Self::from_client(aws_sdk_kms::Client::from_conf(builder.build()))
    }

    /// Wrap an already-configured SDK client.
    pub fn from_client(client: aws_sdk_kms::Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }

    async fn client(&self) -> Result<aws_sdk_kms::Client, KmsError> {
        self.client.read().await.clone().ok_or(KmsError::Closed)
    }
}

#[async_trait]
impl KeyManagementClient for AwsKms {
    async fn wrap(&self, kek: &KekRef, plaintext_key: &[u8]) -> Result<Vec<u8>, KmsError> {
        let resp = self
            .client()
            .await?
            .encrypt()
            .key_id(kek.as_str())
            .plaintext(Blob::new(plaintext_key.to_vec()))
            .send()
            .await
            .map_err(|e| classify(kek, e))?;

        resp.ciphertext_blob()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| KmsError::InvalidResponse("Encrypt returned no ciphertext".into()))
    }

    async fn unwrap(
        &self,
        kek: &KekRef,
        wrapped_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let resp = self
            .client()
            .await?
            .decrypt()
            .key_id(kek.as_str())
            .ciphertext_blob(Blob::new(wrapped_key.to_vec()))
            .send()
            .await
            .map_err(|e| classify(kek, e))?;

        resp.plaintext()
            .map(|b| Zeroizing::new(b.as_ref().to_vec()))
            .ok_or_else(|| KmsError::InvalidResponse("Decrypt returned no plaintext".into()))
    }

    async fn close(&self) -> Result<(), KmsError> {
        // Dropping the last client handle releases its connection pool.
        self.client.write().await.take();
        info!("AWS KMS client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_codes() {
        assert_eq!(classify_code("InvalidCiphertextException"), ErrorClass::Integrity);
        assert_eq!(classify_code("IncorrectKeyException"), ErrorClass::Integrity);
    }

    #[test]
    fn transient_codes() {
        assert_eq!(classify_code("ThrottlingException"), ErrorClass::Transient);
        assert_eq!(classify_code("DependencyTimeoutException"), ErrorClass::Transient);
        assert_eq!(classify_code("KMSInternalException"), ErrorClass::Transient);
    }

    #[test]
    fn authorization_and_unknown_codes_are_not_retried() {
        assert_eq!(classify_code("AccessDeniedException"), ErrorClass::Unavailable);
        assert_eq!(classify_code("NotFoundException"), ErrorClass::Unavailable);
        assert_eq!(classify_code("DisabledException"), ErrorClass::Unavailable);
        assert_eq!(classify_code("SomethingNew"), ErrorClass::Unavailable);
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let conf = aws_sdk_kms::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_kms::config::Region::new("us-east-1"))
            .build();
        let kms = AwsKms::from_client(aws_sdk_kms::Client::from_conf(conf));
        kms.close().await.unwrap();
        let err = kms.wrap(&KekRef::from("alias/general"), &[0u8; 32]).await;
        assert!(matches!(err, Err(KmsError::Closed)));
    }
}
