//! `accent__change_accent` — switches the TTS voice/accent used for the
//! rest of the call. The sole built-in tool that exercises the process-wide
//! voice setting (see [`crate::voice`]).

use serde_json::Value;

use crate::tools::ToolDescriptor;
use crate::voice::VoiceState;

const ACCENTS: &[(&str, &str)] = &[
    ("Australian", "Olivia"),
    ("British", "Brian"),
    ("Indian", "Kajal"),
    ("Irish", "Niamh"),
    ("New Zealander", "Aria"),
    ("South African", "Ayanda"),
    ("American", "Stephen"),
    ("Finnish", "Suvi"),
    ("French", "Remi"),
    ("German", "Daniel"),
    ("Italian", "Adriano"),
    ("Japanese", "Takumi"),
    ("Polish", "Ola"),
    ("Spanish", "Sergio"),
    ("Swedish", "Elin"),
];

pub fn descriptor(voice: VoiceState) -> ToolDescriptor {
    let accent_names: Vec<&str> = ACCENTS.iter().map(|(name, _)| *name).collect();
    let description_list = accent_names.join(", ");

    ToolDescriptor::new(
        "accent",
        "change_accent",
        "Changes the agent's accent.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "accent": {
                    "type": "string",
                    "description": format!("The accent to change to. Needs to be one of {description_list}"),
                }
            },
            "required": ["accent"],
        }),
        std::sync::Arc::new(move |params: Value| {
            let voice = voice.clone();
            Box::pin(change_accent(voice, params))
        }),
    )
}

async fn change_accent(voice: VoiceState, params: Value) -> anyhow::Result<String> {
    let Some(accent) = params.get("accent").and_then(Value::as_str) else {
        return Ok("Accent parameter is required".to_string());
    };

    let Some((name, voice_id)) = ACCENTS.iter().find(|(n, _)| *n == accent) else {
        let names: Vec<&str> = ACCENTS.iter().map(|(n, _)| *n).collect();
        return Ok(format!("Accent needs to be one of {}", names.join(", ")));
    };

    voice.set(*voice_id).await;

    Ok(format!(
        "The phone agent's accent is now {name}. The phone agent's nationality is also {name}. Please keep using English language."
    ))
}
