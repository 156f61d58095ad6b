use std::env;
use std::thread;
use std::time::Duration;

use ureq::Agent;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget Pushover client.
///
/// Disabled unless `FILMON_NOTIFY=1` and both `PUSHOVER_TOKEN` and
/// `PUSHOVER_USER` are set. `send` spawns a throwaway thread and never
/// reports delivery errors: a failed push must not be able to disturb the
/// monitor.
#[derive(Clone)]
pub struct Notifier {
    creds: Option<(String, String)>,
}

impl Notifier {
    pub fn from_env() -> Notifier {
        let enabled = env::var("FILMON_NOTIFY").map(|v| v == "1").unwrap_or(false);
        let creds = match (enabled, env::var("PUSHOVER_TOKEN"), env::var("PUSHOVER_USER")) {
            (true, Ok(token), Ok(user)) if !token.is_empty() && !user.is_empty() => {
                Some((token, user))
            }
            _ => None,
        };
        Notifier { creds }
    }

    pub fn disabled() -> Notifier {
        Notifier { creds: None }
    }

    pub fn send(&self, title: &str, message: &str, priority: i32) {
        let Some((token, user)) = self.creds.clone() else {
            return;
        };
        let title = title.to_string();
        let message = message.to_string();
        thread::spawn(move || {
            let _ = post_message(&token, &user, &title, &message, priority);
        });
    }
}

/// One POST to the Pushover message API. Also used by
/// `filmonctl test-notify`, which does want the error.
pub fn post_message(
    token: &str,
    user: &str,
    title: &str,
    message: &str,
    priority: i32,
) -> Result<(), ureq::Error> {
    let agent: Agent = Agent::config_builder()
        .timeout_global(Some(SEND_TIMEOUT))
        .build()
        .into();
    let priority = priority.to_string();
    agent.post(PUSHOVER_URL).send_form([
        ("token", token),
        ("user", user),
        ("title", title),
        ("message", message),
        ("priority", priority.as_str()),
    ])?;
    Ok(())
}
