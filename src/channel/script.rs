//! Outbound script call builder
//!
//! String arguments can only enter a call through [`ScriptCall::arg`], which
//! escapes them, so nothing unescaped ever reaches the injected source.

use crate::escape::escape;

/// Script object the remote peer installs on every page
pub const SCRIPT_OBJECT: &str = "lingVisSdk";

pub const SIGN_IN: &str = "polyReadiumSignIn";
pub const SIGN_OUT: &str = "polyReadiumSignOut";
pub const GET_SETTINGS: &str = "polyReadiumGetSettings";
pub const UPDATE_SETTINGS: &str = "polyReadiumUpdateSettings";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScriptArg {
    Str(String),
    Flag(bool),
}

/// `lingVisSdk.<method>(...)` invocation text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    method: &'static str,
    args: Vec<ScriptArg>,
}

impl ScriptCall {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            args: Vec::new(),
        }
    }

    /// Append a single-quoted, escaped string argument
    pub fn arg(mut self, value: &str) -> Self {
        self.args.push(ScriptArg::Str(escape(value)));
        self
    }

    /// Append a bare boolean argument
    pub fn flag(mut self, value: bool) -> Self {
        self.args.push(ScriptArg::Flag(value));
        self
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn render(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| match arg {
                ScriptArg::Str(escaped) => format!("'{}'", escaped),
                ScriptArg::Flag(flag) => flag.to_string(),
            })
            .collect();
        format!("{}.{}({})", SCRIPT_OBJECT, self.method, args.join(", "))
    }
}

/// Credentials sign-in issued by the host application
pub fn user_sign_in(
    call_id: &str,
    email: &str,
    password: &str,
    app_id: &str,
    new_account: bool,
    autogenerated: bool,
) -> ScriptCall {
    ScriptCall::new(SIGN_IN)
        .arg(call_id)
        .arg("")
        .arg(email)
        .arg(password)
        .arg(app_id)
        .arg("")
        .flag(new_account)
        .arg("")
        .flag(autogenerated)
}

/// Token sign-in issued when a channel reports ready; carries no call id
pub fn token_sign_in(token: &str, app_id: &str, book_key: &str, client_data: &str) -> ScriptCall {
    ScriptCall::new(SIGN_IN)
        .arg("")
        .arg(token)
        .arg("")
        .arg("")
        .arg(app_id)
        .arg(book_key)
        .arg("")
        .arg(client_data)
}

pub fn sign_out(call_id: &str) -> ScriptCall {
    ScriptCall::new(SIGN_OUT).arg(call_id)
}

pub fn get_settings(call_id: &str) -> ScriptCall {
    ScriptCall::new(GET_SETTINGS).arg(call_id)
}

pub fn update_settings(call_id: &str, l2: &str, l1: &str, level: &str) -> ScriptCall {
    ScriptCall::new(UPDATE_SETTINGS)
        .arg(call_id)
        .arg(l2)
        .arg(l1)
        .arg(level)
}
