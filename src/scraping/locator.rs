//! Query-based element locators.
//!
//! A [`Locator`] is a description of how to find elements, never a live
//! handle. Drivers re-resolve it on every call, so a locator stays valid
//! across reloads and group expansion even though the DOM nodes behind it do
//! not.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorStep {
    /// `querySelectorAll` from every current match (`:scope` refers to the match).
    Css(String),
    /// Keep only the n-th current match (zero-based).
    Nth(usize),
    /// Keep current matches whose text content contains the string.
    HasText(String),
    /// Keep current matches that are rendered (have a layout box).
    Visible,
    /// Descendants with an ARIA role whose accessible name contains `name`
    /// (trimmed, case-insensitive) or, when `exact`, equals it.
    Role {
        role: String,
        name: String,
        exact: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    steps: Vec<LocatorStep>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep::Css(selector.into())],
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep::Role {
                role: role.into(),
                name: name.into(),
                exact: false,
            }],
        }
    }

    /// Like [`Locator::role`] but the accessible name must match exactly.
    pub fn role_exact(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep::Role {
                role: role.into(),
                name: name.into(),
                exact: true,
            }],
        }
    }

    /// Descend into `selector` relative to the current matches.
    pub fn locate(mut self, selector: impl Into<String>) -> Self {
        self.steps.push(LocatorStep::Css(selector.into()));
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.steps.push(LocatorStep::Nth(index));
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    pub fn visible(mut self) -> Self {
        self.steps.push(LocatorStep::Visible);
        self
    }

    pub fn has_text(mut self, text: impl Into<String>) -> Self {
        self.steps.push(LocatorStep::HasText(text.into()));
        self
    }

    pub fn steps(&self) -> &[LocatorStep] {
        &self.steps
    }

    /// JavaScript expression evaluating to an array of the matching elements.
    pub fn to_js(&self) -> String {
        let mut js = String::from("(() => { let nodes = [document];");
        for step in &self.steps {
            match step {
                LocatorStep::Css(sel) => js.push_str(&format!(
                    " nodes = nodes.flatMap(n => Array.from(n.querySelectorAll({})));",
                    js_string(sel)
                )),
                LocatorStep::Nth(i) => {
                    js.push_str(&format!(" nodes = nodes.length > {i} ? [nodes[{i}]] : [];"))
                }
                LocatorStep::HasText(text) => js.push_str(&format!(
                    " nodes = nodes.filter(n => (n.textContent || '').includes({}));",
                    js_string(text)
                )),
                LocatorStep::Visible => js.push_str(
                    " nodes = nodes.filter(n => n.offsetParent !== null || n.getClientRects().length > 0);",
                ),
                LocatorStep::Role { role, name, exact } => {
                    let test = if *exact {
                        format!("label === {}", js_string(name.trim()))
                    } else {
                        format!(
                            "label.toLowerCase().includes({})",
                            js_string(&name.trim().to_lowercase())
                        )
                    };
                    js.push_str(&format!(
                        " nodes = nodes.flatMap(n => Array.from(n.querySelectorAll({sel}))).filter(n => {{ \
                         const label = (n.getAttribute('aria-label') || n.textContent || '').trim(); \
                         return {test}; }});",
                        sel = js_string(&role_selector(role)),
                    ))
                }
            }
        }
        js.push_str(" return nodes; })()");
        js
    }
}

/// Elements that carry `role` either implicitly or explicitly.
fn role_selector(role: &str) -> String {
    match role {
        "button" => "button, [role='button'], input[type='button'], input[type='submit']".to_string(),
        "link" => "a[href], [role='link']".to_string(),
        other => format!("[role='{other}']"),
    }
}

/// Quote a Rust string as a JavaScript string literal.
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|s| match s {
                LocatorStep::Css(sel) => sel.clone(),
                LocatorStep::Nth(i) => format!("nth={i}"),
                LocatorStep::HasText(t) => format!("has-text={t:?}"),
                LocatorStep::Visible => "visible".to_string(),
                LocatorStep::Role { role, name, exact: false } => {
                    format!("role={role}[name={name:?}]")
                }
                LocatorStep::Role { role, name, exact: true } => {
                    format!("role={role}[name={name:?} exact]")
                }
            })
            .collect();
        f.write_str(&parts.join(" >> "))
    }
}
