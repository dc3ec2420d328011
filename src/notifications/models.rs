use serde::Serialize;

/// A formatted alert ready for delivery through any channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub title: String,
    /// Markdown-flavoured body (`**label:** value` lines).
    pub body: String,
    /// Short key/value pairs rendered as card facts by channels that support them.
    pub facts: Vec<AlertFact>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertFact {
    pub name: String,
    pub value: String,
}

impl AlertFact {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl AlertMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            facts: Vec::new(),
        }
    }

    pub fn with_fact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.push(AlertFact::new(name, value));
        self
    }

    /// The title without its leading emoji marker, for mail subjects.
    pub fn plain_title(&self) -> String {
        self.title
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_string()
    }

    /// The body with markdown emphasis removed, for plain-text channels.
    pub fn plain_body(&self) -> String {
        self.body.replace("**", "")
    }
}
