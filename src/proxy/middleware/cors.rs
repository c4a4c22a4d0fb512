// CORS headers attached to every gateway response
use axum::http::{header, HeaderMap, HeaderValue};

pub const ALLOWED_METHODS: &str = "GET, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowOrigin {
    Any,
    Exact(String),
}

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origin: AllowOrigin,
}

impl CorsPolicy {
    pub fn any() -> Self {
        Self {
            origin: AllowOrigin::Any,
        }
    }

    pub fn exact(origin: impl Into<String>) -> Self {
        Self {
            origin: AllowOrigin::Exact(origin.into()),
        }
    }

    /// `None`, empty, or `*` allow any origin
    pub fn from_setting(origin: Option<&str>) -> Self {
        match origin.map(str::trim) {
            None | Some("") | Some("*") => Self::any(),
            Some(o) => Self::exact(o),
        }
    }

    pub fn origin(&self) -> &AllowOrigin {
        &self.origin
    }

    /// Credentials are only allowed with an explicit origin; browsers reject them with `*`.
    pub fn allows_credentials(&self) -> bool {
        matches!(self.origin, AllowOrigin::Exact(_))
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        let origin = match &self.origin {
            AllowOrigin::Any => HeaderValue::from_static("*"),
            AllowOrigin::Exact(o) => match HeaderValue::from_str(o) {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!("Allowed origin {:?} is not a valid header value, using *", o);
                    HeaderValue::from_static("*")
                }
            },
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        if self.allows_credentials() {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.apply(&mut headers);
        headers
    }
}
