use url::form_urlencoded;

/// Parameters of an authorization response, as found in a redirect query,
/// fragment, or form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
    pub session_state: Option<String>,
}

impl AuthorizeResponse {
    /// Parse a raw response.
    ///
    /// Accepts a bare parameter string (`code=..&state=..`), a query string with
    /// its leading `?`, or a complete redirect URL such as `myapp://cb?code=..`
    /// or `http://127.0.0.1:18989/cb#code=..`.
    pub fn parse(raw: &str) -> Self {
        let params = parameter_section(raw.trim());
        let mut response = AuthorizeResponse::default();
        for (key, value) in form_urlencoded::parse(params.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => response.code = value,
                "state" => response.state = value,
                "error" => response.error = value,
                "error_description" => response.error_description = value,
                "id_token" => response.id_token = value,
                "scope" => response.scope = value,
                "session_state" => response.session_state = value,
                _ => {}
            }
        }
        response
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Re-encode the parameters of `raw` with its `state` replaced by `state`.
pub(crate) fn replace_state(raw: &str, state: &str) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut replaced = false;
    for (key, value) in form_urlencoded::parse(parameter_section(raw.trim()).as_bytes()) {
        if key != "state" {
            serializer.append_pair(&key, &value);
        } else if !replaced {
            serializer.append_pair("state", state);
            replaced = true;
        }
    }
    if !replaced {
        serializer.append_pair("state", state);
    }
    serializer.finish()
}

fn parameter_section(raw: &str) -> &str {
    if let Some(query) = raw.strip_prefix('?') {
        return query;
    }
    if let Some(fragment) = raw.strip_prefix('#') {
        return fragment;
    }
    // Bare parameters may carry a literal `?` in a value; only a URL has a query prefix.
    if !raw.contains("://") && !raw.starts_with('/') {
        return raw;
    }
    if let Some(idx) = raw.find('?') {
        let query = &raw[idx + 1..];
        return match query.find('#') {
            Some(end) => &query[..end],
            None => query,
        };
    }
    match raw.find('#') {
        Some(idx) => &raw[idx + 1..],
        None => "",
    }
}
