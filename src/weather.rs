//! `weather__get_weather_today` — looks up a location via Open-Meteo's
//! geocoding API, then fetches that day's forecast.

use serde_json::Value;

use crate::tools::ToolDescriptor;

pub fn descriptor(client: reqwest::Client) -> ToolDescriptor {
    ToolDescriptor::new(
        "weather",
        "get_weather_today",
        "Gets the current weather for today for Barcelona, where the user is located.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The name of he city for the weather forecast.",
                },
                "day": {
                    "type": "string",
                    "description": "Day for the weather forecast in ISO 8601 format: YYYY-MM-DD.",
                }
            },
            "required": ["location", "day"],
        }),
        std::sync::Arc::new(move |params: Value| {
            let client = client.clone();
            Box::pin(get_weather(client, params))
        }),
    )
}

async fn get_weather(client: reqwest::Client, params: Value) -> anyhow::Result<String> {
    let Some(day) = params.get("day").and_then(Value::as_str) else {
        return Ok("The \"day\" parameter is mandatory.".to_string());
    };
    let Some(location) = params.get("location").and_then(Value::as_str) else {
        return Ok("The \"location\" parameter is mandatory.".to_string());
    };

    if chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").is_err() {
        return Ok("Day needs to be specified in ISO 8601 format: YYYY-MM-DD.".to_string());
    }

    let geocode = match fetch_json(
        client
            .get("https://geocoding-api.open-meteo.com/v1/search")
            .query(&[("name", location), ("count", "1")]),
    )
    .await
    {
        Ok(v) => v,
        Err(message) => return Ok(message),
    };

    let Some(first) = geocode.get("results").and_then(|r| r.as_array()).and_then(|a| a.first()) else {
        return Ok(format!("Sorry, cannot find location {location}"));
    };

    let latitude = first["latitude"].as_f64().unwrap_or_default();
    let longitude = first["longitude"].as_f64().unwrap_or_default();
    let found_location = format!(
        "{}, {}",
        first["name"].as_str().unwrap_or_default(),
        first["country_code"].as_str().unwrap_or_default()
    );

    let forecast = match fetch_json(
        client
            .get("https://api.open-meteo.com/v1/forecast")
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                (
                    "daily",
                    "weathercode,temperature_2m_max,temperature_2m_min,apparent_temperature_max,\
                     apparent_temperature_min,uv_index_max,precipitation_hours,precipitation_probability_max"
                        .to_string(),
                ),
                ("timezone", "Europe/Berlin".to_string()),
                ("start_date", day.to_string()),
                ("end_date", day.to_string()),
            ]),
    )
    .await
    {
        Ok(v) => v,
        Err(message) => return Ok(message),
    };

    let wmo_code = forecast["daily"]["weathercode"][0].as_i64().unwrap_or(-1);
    let prediction = wmo_description(wmo_code);

    let daily = &forecast["daily"];
    let units = &forecast["daily_units"];

    Ok(format!(
        "Weather forecast for {day} in {found_location}\n\n\
         Prediction: {prediction}\n\
         Max temperature: {}{}\n\
         Min temperature: {}{}\n\
         Precipitation probability: {}{}",
        daily["temperature_2m_max"][0],
        units["temperature_2m_max"].as_str().unwrap_or_default(),
        daily["temperature_2m_min"][0],
        units["temperature_2m_min"].as_str().unwrap_or_default(),
        daily["precipitation_probability_max"][0],
        units["precipitation_probability_max"].as_str().unwrap_or_default(),
    ))
}

/// Runs a request and parses its JSON body, turning network/HTTP failures
/// into a descriptive string instead of propagating an error — callers
/// return the string as the tool result rather than a dispatch failure.
async fn fetch_json(request: reqwest::RequestBuilder) -> Result<Value, String> {
    let response = request
        .send()
        .await
        .map_err(|e| format!("Sorry, could not fetch the weather: {e}"))?;

    response
        .error_for_status()
        .map_err(|e| format!("Sorry, could not fetch the weather: {e}"))?
        .json::<Value>()
        .await
        .map_err(|e| format!("Sorry, could not fetch the weather: {e}"))
}

fn wmo_description(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1..=3 => "Mainly clear, partly cloudy, and overcast",
        45 | 48 => "Fog and depositing rime fog",
        51 | 53 | 55 => "Drizzle: Light, moderate, and dense intensity",
        56 | 57 => "Freezing Drizzle: Light and dense intensity",
        61 | 63 | 65 => "Rain: Slight, moderate and heavy intensity",
        66 | 67 => "Freezing Rain: Light and heavy intensity",
        71 | 73 | 75 => "Snow fall: Slight, moderate, and heavy intensity",
        77 => "Snow grains",
        80 | 81 | 82 => "Rain showers: Slight, moderate, and violent",
        85 | 86 => "Snow showers slight and heavy",
        95 => "Thunderstorm: Slight or moderate",
        96 | 99 => "Thunderstorm with slight and heavy hail",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_day() {
        let client = reqwest::Client::new();
        let result = get_weather(client, serde_json::json!({"location": "London"})).await.unwrap();
        assert_eq!(result, "The \"day\" parameter is mandatory.");
    }

    #[tokio::test]
    async fn test_missing_location() {
        let client = reqwest::Client::new();
        let result = get_weather(client, serde_json::json!({"day": "2023-07-29"})).await.unwrap();
        assert_eq!(result, "The \"location\" parameter is mandatory.");
    }

    #[tokio::test]
    async fn test_invalid_day_format() {
        let client = reqwest::Client::new();
        let result = get_weather(
            client,
            serde_json::json!({"location": "London", "day": "29-07-2023"}),
        )
        .await
        .unwrap();
        assert_eq!(result, "Day needs to be specified in ISO 8601 format: YYYY-MM-DD.");
    }

    #[tokio::test]
    async fn test_fetch_json_network_failure_is_a_descriptive_string_not_an_error() {
        let client = reqwest::Client::new();
        let request = client.get("https://this-host-does-not-resolve.invalid/");
        let result = fetch_json(request).await;
        let message = result.expect_err("an unreachable host must fail");
        assert!(message.starts_with("Sorry, could not fetch the weather:"));
    }

    #[test]
    fn test_wmo_description_known_code() {
        assert_eq!(wmo_description(61), "Rain: Slight, moderate and heavy intensity");
    }

    #[test]
    fn test_wmo_description_clear_sky_is_distinct_from_partly_cloudy() {
        assert_eq!(wmo_description(0), "Clear sky");
        assert_eq!(wmo_description(2), "Mainly clear, partly cloudy, and overcast");
    }

    #[test]
    fn test_wmo_description_unknown_code() {
        assert_eq!(wmo_description(12345), "Unknown");
    }

    #[test]
    fn test_descriptor_qualified_name() {
        let descriptor = descriptor(reqwest::Client::new());
        assert_eq!(descriptor.qualified_name, "weather__get_weather_today");
    }
}
