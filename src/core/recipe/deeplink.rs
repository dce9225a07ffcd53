use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::Recipe;

/// URL prefix shared with the desktop client.
pub const DEEPLINK_PREFIX: &str = "goose://recipe/";

/// Encode a recipe as `goose://recipe/<url-safe-base64(gzip(json))>`.
pub fn encode(recipe: &Recipe) -> Result<String> {
    let json = serde_json::to_vec(recipe).context("failed to serialise recipe")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .context("failed to compress recipe")?;
    let compressed = encoder.finish().context("failed to finish gzip stream")?;
    let encoded = base64::engine::general_purpose::URL_SAFE.encode(compressed);
    Ok(format!("{}{}", DEEPLINK_PREFIX, encoded))
}

/// Decode a deeplink back into a recipe. Accepts the bare payload or the
/// full `goose://recipe/` form; tolerates standard base64 and uncompressed
/// JSON payloads from older clients.
pub fn decode(link: &str) -> Result<Recipe> {
    let encoded = link.strip_prefix(DEEPLINK_PREFIX).unwrap_or(link);

    let compressed = base64::engine::general_purpose::URL_SAFE
        .decode(encoded)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(encoded))
        .context("failed to decode deeplink base64")?;

    let mut json = Vec::new();
    let mut decoder = GzDecoder::new(compressed.as_slice());
    if decoder.read_to_end(&mut json).is_err() {
        json = compressed;
    }

    let recipe: Recipe =
        serde_json::from_slice(&json).context("failed to parse recipe JSON")?;
    if recipe.title.is_empty() {
        return Err(anyhow!("decoded recipe has no title"));
    }
    Ok(recipe)
}

pub fn is_deeplink(s: &str) -> bool {
    s.starts_with(DEEPLINK_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recipe() -> Recipe {
        Recipe {
            version: "1.0.0".into(),
            title: "triage".into(),
            description: "triage open issues".into(),
            instructions: Some("Look at the issue tracker.".into()),
            prompt: Some("triage now".into()),
            extensions: vec![serde_json::json!({"type": "platform", "name": "todo"})],
            settings: None,
            activities: vec![],
            author: None,
            parameters: vec![super::super::RecipeParameter {
                key: "repo".into(),
                input_type: "string".into(),
                requirement: "required".into(),
                description: "repository slug".into(),
                default: None,
                options: vec![],
            }],
            response: None,
            sub_recipes: vec![],
            retry: None,
        }
    }

    #[test]
    fn round_trips_through_deeplink() {
        let recipe = sample_recipe();
        let link = encode(&recipe).unwrap();
        assert!(link.starts_with(DEEPLINK_PREFIX));
        assert!(is_deeplink(&link));
        let decoded = decode(&link).unwrap();
        assert_eq!(decoded, recipe);
    }

    #[test]
    fn decodes_bare_payload() {
        let recipe = sample_recipe();
        let link = encode(&recipe).unwrap();
        let bare = link.strip_prefix(DEEPLINK_PREFIX).unwrap();
        assert_eq!(decode(bare).unwrap(), recipe);
    }

    #[test]
    fn decodes_uncompressed_json_payload() {
        let json = serde_json::to_vec(&sample_recipe()).unwrap();
        let encoded = base64::engine::general_purpose::URL_SAFE.encode(json);
        assert_eq!(decode(&encoded).unwrap(), sample_recipe());
    }

    #[test]
    fn rejects_titleless_recipes() {
        let mut recipe = sample_recipe();
        recipe.title = String::new();
        let link = encode(&recipe).unwrap();
        assert!(decode(&link).is_err());
    }
}
