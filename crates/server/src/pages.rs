//! Server-rendered HTML pages (Askama).

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// One labelled value shown below a page message.
#[derive(Debug, Clone)]
pub struct Detail {
    pub name: String,
    pub value: String,
}

impl Detail {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Template)]
#[template(path = "message.html")]
pub struct MessagePage {
    pub title: String,
    pub message: String,
    pub details: Vec<Detail>,
}

impl MessagePage {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn detail(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.details.push(Detail::new(name, value));
        }
        self
    }
}

/// Loads every relying party's front-channel logout URI, then leaves for `redirect_to`.
#[derive(Template)]
#[template(path = "frontchannel_logout.html")]
pub struct FrontchannelLogoutPage {
    pub iframes: Vec<String>,
    pub redirect_to: String,
}

#[derive(Template)]
#[template(path = "device_verify.html")]
pub struct DeviceVerifyPage {
    pub action: String,
}

/// Renders `page` as an HTML response with `status`.
#[tracing::instrument(skip(page))]
pub fn render<T: Template>(status: StatusCode, page: &T) -> Response {
    match page.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render page");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_page_escapes_details() {
        let html = MessagePage::new("Error", "Something failed")
            .detail("Hint", Some("<script>"))
            .detail("Empty", Some(""))
            .detail("Missing", None)
            .render()
            .unwrap();
        assert!(html.contains("Something failed"));
        assert!(html.contains("&#60;script&#62;") || html.contains("&lt;script&gt;"));
        assert!(!html.contains("Missing"));
        assert!(!html.contains("Empty"));
    }

    #[test]
    fn frontchannel_page_embeds_every_iframe() {
        let html = FrontchannelLogoutPage {
            iframes: vec![
                "https://a.example.com/logout?sid=1".into(),
                "https://b.example.com/logout".into(),
            ],
            redirect_to: "https://a.example.com/bye".into(),
        }
        .render()
        .unwrap();
        assert_eq!(html.matches("<iframe").count(), 2);
        assert!(html.contains("https://a.example.com/bye"));
    }
}
