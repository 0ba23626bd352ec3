use lambda_http::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use lambda_http::http::{Method, StatusCode};
use lambda_http::{Body, Error, Response};
use stack_atoms::responses::{empty_response, error_response};

pub const ALLOWED_METHODS: &str = "GET,POST,PUT,DELETE,OPTIONS,PATCH";
pub const ALLOWED_HEADERS: &str = "Authorization,Content-Type";

/// Cross-origin rules: a single trusted origin (the web app)
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origin: String,
}

impl CorsPolicy {
    pub fn new(allowed_origin: &str) -> Self {
        Self {
            allowed_origin: allowed_origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        origin.trim_end_matches('/') == self.allowed_origin
    }

    /// Browser preflight: OPTIONS carrying an Origin
    pub fn is_preflight(method: &Method, origin: Option<&str>) -> bool {
        *method == Method::OPTIONS && origin.is_some()
    }

    /// Same-origin and non-browser calls carry no Origin and always pass
    pub fn rejects(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|o| !self.is_allowed(o))
    }

    pub fn preflight_response(&self, origin: Option<&str>) -> Result<Response<Body>, Error> {
        if self.rejects(origin) {
            return self.rejected();
        }

        let mut resp = empty_response(StatusCode::OK)?;
        let headers = resp.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("1800"));
        Ok(self.with_cors_headers(resp, origin))
    }

    pub fn rejected(&self) -> Result<Response<Body>, Error> {
        tracing::warn!("Rejected cross-origin request");
        error_response(StatusCode::FORBIDDEN, "Forbidden", "Invalid CORS request")
    }

    /// Echo the allowed origin back; responses to other callers are left alone
    pub fn with_cors_headers(&self, mut resp: Response<Body>, origin: Option<&str>) -> Response<Body> {
        let headers = resp.headers_mut();
        headers.append(VARY, HeaderValue::from_static("Origin"));

        if let Some(origin) = origin.filter(|o| self.is_allowed(o)) {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
        resp
    }
}
