//! Outbound replies and the text the voter sees.

use crate::config::ElectionConfig;
use crate::tally::TallyReport;

/// A message for the gateway to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text. Clears any custom keyboard left from an earlier prompt.
    Text(String),

    /// Ask the voter to share their own contact card.
    ContactRequest { text: String, button: String },

    /// Candidate buttons as `(callback data, label)` pairs, in ballot order.
    CandidatePrompt {
        text: String,
        options: Vec<(String, String)>,
    },
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Text(text)
            | Reply::ContactRequest { text, .. }
            | Reply::CandidatePrompt { text, .. } => text,
        }
    }

    pub fn welcome(first_name: Option<&str>) -> Self {
        let greeting = match first_name {
            Some(name) if !name.trim().is_empty() => format!("Welcome, {}!", name.trim()),
            _ => "Welcome!".to_string(),
        };
        Reply::Text(format!(
            "🗳️ {greeting} This is the school president election.\n\n\
             To vote, please enter the unique code you received from your class teacher. \
             Send /cancel to stop."
        ))
    }

    pub fn malformed_code() -> Self {
        Reply::Text(
            "❌ Invalid code format. Please enter your 8-character code (letters and digits)."
                .into(),
        )
    }

    pub fn enter_code() -> Self {
        Reply::Text("Please send the 8-character code from your class teacher.".into())
    }

    pub fn code_not_found() -> Self {
        Reply::Text(
            "❌ This code was not found. Check it for typos or ask your class teacher.".into(),
        )
    }

    pub fn code_already_used() -> Self {
        Reply::Text(
            "❌ This code has already been used to vote. Each code can be used only once.".into(),
        )
    }

    pub fn contact_request(class_name: &str) -> Self {
        Reply::ContactRequest {
            text: format!(
                "✅ Code accepted! You are voting for class {class_name}.\n\n\
                 To confirm your identity, press the button below to share your phone number. \
                 Send /cancel to stop."
            ),
            button: "Share my phone number 📲".into(),
        }
    }

    pub fn contact_not_bound() -> Self {
        Reply::Text(
            "❌ Please press the \"Share my phone number\" button to confirm your own contact."
                .into(),
        )
    }

    pub fn claim_failed() -> Self {
        Reply::Text(
            "❌ We could not register your code. Please try again later or contact an administrator."
                .into(),
        )
    }

    pub fn candidate_prompt(config: &ElectionConfig) -> Self {
        Reply::CandidatePrompt {
            text: "✅ Identity confirmed. Now choose your candidate:".into(),
            options: config
                .candidates
                .iter()
                .map(|c| (config.callback_data(c), c.label.clone()))
                .collect(),
        }
    }

    pub fn use_buttons() -> Self {
        Reply::Text("Please choose a candidate using the buttons above.".into())
    }

    pub fn unknown_candidate() -> Self {
        Reply::Text("❌ Unknown candidate. Please try again.".into())
    }

    pub fn vote_recorded(label: &str) -> Self {
        Reply::Text(format!(
            "🎉 Your vote has been counted!\n\nYou voted for {label}.\n\nThank you for taking part!"
        ))
    }

    pub fn vote_failed() -> Self {
        Reply::Text(
            "❌ Your vote could not be recorded. Please contact an administrator; \
             your code has been used and cannot be reused."
                .into(),
        )
    }

    pub fn store_unavailable() -> Self {
        Reply::Text(
            "❌ The voting service is temporarily unavailable. Please try again later with /start."
                .into(),
        )
    }

    pub fn session_lost() -> Self {
        Reply::Text("❌ Your session data was lost. Please start again with /start.".into())
    }

    pub fn cancelled() -> Self {
        Reply::Text("Cancelled. Send /start to begin voting again.".into())
    }

    pub fn timed_out() -> Self {
        Reply::Text("⌛ Your voting session expired. Send /start to begin again.".into())
    }

    pub fn no_session() -> Self {
        Reply::Text("Send /start to begin voting.".into())
    }

    pub fn admin_only() -> Self {
        Reply::Text("❌ This command is available to administrators only.".into())
    }

    pub fn results_unavailable() -> Self {
        Reply::Text("❌ Could not read the votes table. Check the logs.".into())
    }

    pub fn results(report: &TallyReport) -> Self {
        Reply::Text(report.render())
    }
}
