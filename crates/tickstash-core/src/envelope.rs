use serde::{Deserialize, Serialize};

use crate::orchestrator::{FetchError, Resolved};
use crate::routing::ProviderFailure;
use crate::{ProviderId, UtcDateTime, ValidationError};

/// Standard response envelope for all `tickstash` machine-readable outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: EnvelopeMeta,
    pub data: T,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}

impl<T> Envelope<T> {
    pub fn success(meta: EnvelopeMeta, data: T) -> Self {
        Self {
            meta,
            data,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(
        meta: EnvelopeMeta,
        data: T,
        errors: Vec<EnvelopeError>,
    ) -> Result<Self, ValidationError> {
        meta.validate()?;
        Ok(Self { meta, data, errors })
    }
}

/// Metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub generated_at: UtcDateTime,
    /// Provider that produced the data, if any.
    pub source: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<UtcDateTime>,
    pub cache_hit: bool,
    pub stale: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl EnvelopeMeta {
    pub fn new(request_id: impl Into<String>, latency_ms: u64) -> Result<Self, ValidationError> {
        let meta = Self {
            request_id: request_id.into(),
            generated_at: UtcDateTime::now(),
            source: None,
            fetched_at: None,
            cache_hit: false,
            stale: false,
            latency_ms,
            warnings: Vec::new(),
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Copies provenance from a resolved value; fallbacks become warnings.
    pub fn describe<T>(mut self, resolved: &Resolved<T>) -> Self {
        self.source = Some(resolved.source);
        self.fetched_at = Some(resolved.fetched_at);
        self.cache_hit = resolved.cache_hit();
        self.stale = resolved.stale;
        if resolved.stale {
            self.warnings.push(format!(
                "serving stale data fetched at {}",
                resolved.fetched_at
            ));
        }
        for failure in &resolved.failures {
            self.warnings.push(failure.to_string());
        }
        self
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.request_id.trim().len() < 8 {
            return Err(ValidationError::InvalidRequestId);
        }
        Ok(())
    }
}

/// Structured error payload for partial or failed responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ProviderId>,
}

impl EnvelopeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
            source: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_source(mut self, source: ProviderId) -> Self {
        self.source = Some(source);
        self
    }

    /// One error for the overall failure followed by one per provider.
    pub fn from_fetch(error: &FetchError) -> Vec<Self> {
        std::iter::once(Self::new(error.code(), error.to_string()))
            .chain(error.failures().iter().map(Self::from))
            .collect()
    }
}

impl From<&ProviderFailure> for EnvelopeError {
    fn from(failure: &ProviderFailure) -> Self {
        use crate::data_source::SourceErrorKind;

        let retryable = matches!(
            failure.kind,
            SourceErrorKind::RateLimited | SourceErrorKind::TransientNetwork
        );
        Self::new(failure.code, failure.message.clone())
            .with_retryable(retryable)
            .with_source(failure.provider)
    }
}
