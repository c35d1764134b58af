//! `test-utils` is used for testing in both `drest-lib` and `drest-bin`.
//! This crate does not depend on `drest-lib` or `drest-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock API server, which responds with a predefined status to any
/// request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from_u16($status).unwrap());
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any()).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// A response template carrying the rate limit headers of a bucket
#[macro_export]
macro_rules! bucket_response {
    ($status:expr, $bucket:expr, $limit:expr, $remaining:expr, $reset_after:expr $(,)?) => {
        wiremock::ResponseTemplate::new(http::StatusCode::from_u16($status).unwrap())
            .insert_header("X-RateLimit-Bucket", $bucket)
            .insert_header("X-RateLimit-Limit", $limit.to_string().as_str())
            .insert_header("X-RateLimit-Remaining", $remaining.to_string().as_str())
            .insert_header("X-RateLimit-Reset-After", $reset_after)
    };
}

/// A `429` response template with the wait time in its JSON body
#[macro_export]
macro_rules! rate_limited_response {
    ($retry_after:expr, $global:expr $(,)?) => {
        wiremock::ResponseTemplate::new(http::StatusCode::TOO_MANY_REQUESTS).set_body_raw(
            format!(
                r#"{{"message": "You are being rate limited.", "retry_after": {}, "global": {}}}"#,
                $retry_after, $global
            ),
            "application/json",
        )
    };
}

/// Build a plaintext client talking to a mock server, without the default
/// pacing quirks
#[macro_export]
macro_rules! mock_client {
    ($server:expr $(, $func:tt ($($arg:expr),*))* $(,)?) => {{
        let address = $server.address();
        drest_lib::ClientBuilder::builder()
            .host(address.ip().to_string())
            .port(address.port())
            .api_base("")
            .plaintext(true)
            .quirks(drest_lib::quirks::Quirks::none())
            $(.$func($($arg),*))*
            .build()
            .client()
            .unwrap()
    }};
}

/// Get the root path of the project.
#[macro_export]
macro_rules! root_path {
    () => {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap()
            .to_path_buf()
    };
}

/// Gets the "main" binary name (e.g. `drest`)
#[macro_export]
macro_rules! main_command {
    () => {
        Command::cargo_bin("drest").expect("Couldn't find the drest binary")
    };
}
