const DEFAULT_APP_NAME: &str = "Desktop App";

/// Page used when the host does not provide its own template.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{{title}}</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center; background: #f4f5f7; color: #1f2933; }
        .card { max-width: 420px; padding: 2rem; background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0, 0, 0, 0.08); text-align: center; }
        h1 { font-size: 1.4rem; margin: 0 0 1rem; }
        p { margin: 0; line-height: 1.5; }
    </style>
</head>
<body>
    <div class="card">
        <h1>{{title}}</h1>
        <p>{{body}}</p>
    </div>
</body>
</html>"#;

/// Two-placeholder (`{{title}}`, `{{body}}`) template for callback pages.
#[derive(Debug, Clone)]
pub struct HtmlTemplate {
    /// Custom template content; [`DEFAULT_TEMPLATE`] when `None`.
    pub content: Option<String>,
    /// Name shown in page titles.
    pub app_name: String,
}

impl Default for HtmlTemplate {
    fn default() -> Self {
        Self {
            content: None,
            app_name: DEFAULT_APP_NAME.to_owned(),
        }
    }
}

impl HtmlTemplate {
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Render the template. Both values are HTML-escaped.
    pub fn generate(&self, title: &str, body: &str) -> String {
        let template = self.content.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        template
            .replace("{{title}}", &escape_html(title))
            .replace("{{body}}", &escape_html(body))
    }

    pub(crate) fn success_page(&self) -> String {
        self.generate(
            &format!("{} Sign-in Success", self.app_name),
            "You can close this window now.",
        )
    }

    pub(crate) fn error_page(&self, code: &str, description: &str) -> String {
        self.generate(
            &format!("{} Sign-in Error", self.app_name),
            &format!("{code} - {description}"),
        )
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_renders_success() {
        let page = HtmlTemplate::default().with_app_name("Tester").success_page();
        assert!(page.contains("<title>Tester Sign-in Success</title>"));
        assert!(page.contains("You can close this window now."));
    }

    #[test]
    fn custom_content_replaces_placeholders() {
        let template = HtmlTemplate::default().with_content("[{{title}}] {{body}}");
        assert_eq!(template.generate("T", "B"), "[T] B");
    }

    #[test]
    fn error_page_escapes_untrusted_description() {
        let page = HtmlTemplate::default()
            .with_content("{{body}}")
            .error_page("access_denied", "<script>alert(1)</script>");
        assert_eq!(
            page,
            "access_denied - &lt;script&gt;alert(1)&lt;/script&gt;"
        );
    }
}
