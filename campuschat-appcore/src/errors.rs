use campuschat_engine::{ChatError, VoiceError};
use campuschat_providers::TransportError;

/// Short, actionable text for a notification. Details stay in the logs.
pub fn user_facing_error(e: &anyhow::Error) -> String {
    for cause in e.chain() {
        if let Some(t) = cause.downcast_ref::<TransportError>() {
            return transport_message(t);
        }
        if let Some(c) = cause.downcast_ref::<ChatError>() {
            return match c {
                ChatError::SendInFlight => "Please wait for the current reply to finish.".into(),
                ChatError::EmptyMessage => "Type a message first.".into(),
                ChatError::Transport(t) => transport_message(t),
            };
        }
        if let Some(v) = cause.downcast_ref::<VoiceError>() {
            return voice_message(v);
        }
    }

    let raw = e.to_string();
    let first = raw.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        "Something went wrong.".into()
    } else {
        first.to_string()
    }
}

fn transport_message(e: &TransportError) -> String {
    match e {
        TransportError::Unauthorized => "Your session has expired. Please sign in again.".into(),
        TransportError::Status { status: 401, detail } if !detail.trim().is_empty() => detail.clone(),
        TransportError::Status { status: 401, .. } => "Invalid email or password.".into(),
        TransportError::Status { status: 403, .. } => "You don't have permission to do that.".into(),
        TransportError::Status { status: 404, .. } => "That item no longer exists.".into(),
        TransportError::Status { status: 413, .. } => "That file is too large to upload.".into(),
        TransportError::Status { status, .. } if *status >= 500 => {
            "The assistant service is having trouble. Please try again shortly.".into()
        }
        TransportError::Status { detail, .. } => detail.clone(),
        TransportError::Network(_) => {
            "Can't reach the assistant service. Check your connection.".into()
        }
        TransportError::IdleTimeout(_) => "The assistant stopped responding.".into(),
        TransportError::Server(msg) => format!("The assistant reported an error: {msg}"),
        TransportError::Decode(_) => "Received an unexpected response from the server.".into(),
        TransportError::InvalidRequest(msg) => msg.clone(),
        TransportError::Cancelled => "Cancelled.".into(),
    }
}

fn voice_message(e: &VoiceError) -> String {
    match e {
        VoiceError::Microphone(_) => {
            #[cfg(windows)]
            {
                "No usable microphone. Check Settings > Privacy & security > Microphone.".into()
            }
            #[cfg(target_os = "macos")]
            {
                "No usable microphone. Check System Settings > Privacy & Security > Microphone.".into()
            }
            #[cfg(not(any(windows, target_os = "macos")))]
            {
                "Voice input is not available on this platform.".into()
            }
        }
        VoiceError::NothingRecorded => "Nothing was recorded. Try again.".into(),
        VoiceError::Busy(stage) => format!("Voice assistant is busy ({stage})."),
        other => {
            let s = other.to_string();
            let mut chars = s.chars();
            match chars.next() {
                Some(c) => format!("{}{}.", c.to_uppercase(), chars.as_str()),
                None => "Voice assistant error.".into(),
            }
        }
    }
}
