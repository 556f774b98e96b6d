//! Command execution.

use crate::{Commands, ListKind};
use colored::Colorize;
use sermatec_client::{Client, ClientError};
use sermatec_protocol::{Frame, FriendlyValue, ParameterKind, WriteError};
use serde::Serialize;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Get { name } => {
            let fields = client.get(&name).await?;
            Ok(format_json(&fields))
        }

        Commands::Customget { code, raw: true } => {
            let frames = client.get_custom_raw(code).await?;
            Ok(format_frames(&frames))
        }

        Commands::Customget { code, raw: false } => match client.get_custom(code).await {
            Ok(fields) => Ok(format_json(&fields)),
            Err(ClientError::Protocol(e)) => Err(format!(
                "{} (try {} to get the raw bytes)",
                e,
                "--raw".bold()
            )
            .into()),
            Err(e) => Err(e.into()),
        },

        Commands::List { kind } => Ok(match kind {
            ListKind::Sensors => format_json(&client.list_sensors()?),
            ListKind::Binarysensors => format_json(&client.list_binary_sensors()?),
            ListKind::Switches => format_json(&client.list_switches()),
            ListKind::Numbers => format_json(&client.list_numbers()),
            ListKind::Selects => format_json(&client.list_selects()),
        }),

        Commands::Set { tag, value } => {
            let param = client
                .protocol()
                .parameters
                .get(&tag)
                .ok_or_else(|| WriteError::ParameterNotFound(tag.clone()))?;
            let friendly = parse_value(&param.kind, &value);

            let mut snapshot = client.get_parameter_snapshot().await?;
            client.set(&tag, &friendly, &mut snapshot).await?;

            Ok(format!(
                "{} {} to {}",
                "Set".green(),
                tag.cyan(),
                friendly.to_string().yellow()
            ))
        }
    }
}

/// Parses a command code written in decimal or `0x` hexadecimal.
pub fn parse_command_code(arg: &str) -> Result<u8, String> {
    let arg = arg.trim();
    let parsed = match arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
    {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => arg.parse(),
    };
    parsed.map_err(|_| "the command has to be an integer in range [0, 255]".to_string())
}

/// Interprets a command-line value for a parameter of the given kind.
fn parse_value(kind: &ParameterKind, value: &str) -> FriendlyValue {
    match kind {
        ParameterKind::Switch => match value.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => FriendlyValue::Bool(true),
            "off" | "false" | "0" => FriendlyValue::Bool(false),
            _ => FriendlyValue::Text(value.to_string()),
        },
        ParameterKind::Number { .. } => value
            .trim()
            .parse()
            .map(FriendlyValue::Int)
            .unwrap_or_else(|_| FriendlyValue::Text(value.to_string())),
        ParameterKind::Select => FriendlyValue::Text(value.to_string()),
    }
}

/// Formats response frames as space-separated hex, one frame per line.
fn format_frames(frames: &[Frame]) -> String {
    frames
        .iter()
        .map(|frame| {
            frame
                .as_bytes()
                .iter()
                .map(|b| hex::encode([*b]))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formats a value as pretty JSON for display.
fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_code() {
        assert_eq!(parse_command_code("0x98"), Ok(0x98));
        assert_eq!(parse_command_code("0X0a"), Ok(0x0a));
        assert_eq!(parse_command_code("12"), Ok(12));
        assert_eq!(parse_command_code("255"), Ok(255));
        assert!(parse_command_code("256").is_err());
        assert!(parse_command_code("-1").is_err());
        assert!(parse_command_code("0xzz").is_err());
    }

    #[test]
    fn test_parse_value_by_kind() {
        assert_eq!(
            parse_value(&ParameterKind::Switch, "On"),
            FriendlyValue::Bool(true)
        );
        assert_eq!(
            parse_value(&ParameterKind::Switch, "0"),
            FriendlyValue::Bool(false)
        );
        assert_eq!(
            parse_value(&ParameterKind::Number { min: 10, max: 100 }, " 42"),
            FriendlyValue::Int(42)
        );
        assert_eq!(
            parse_value(&ParameterKind::Select, "Peak-Valley"),
            FriendlyValue::Text("Peak-Valley".into())
        );
    }

    #[test]
    fn test_format_frames() {
        let frames = vec![
            Frame::request(0x98, &[]).unwrap(),
            Frame::response(0x0a, &[0x01]).unwrap(),
        ];
        let out = format_frames(&frames);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "fe 55 64 14 98 00 00 4c ae");
        assert!(lines[1].starts_with("fe 55 14 64 0a 00 01 01"));
    }
}
