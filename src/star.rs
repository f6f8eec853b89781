//! Star registration payloads
//!
//! This is shaping done by callers of the notary, not part of the ledger:
//! stories are capped at [`STORY_WORD_LIMIT`] words and hex-encoded before
//! they become a block body, and decoded again only for display.

use crate::blockchain::{Block, Ledger};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STORY_WORD_LIMIT: usize = 250;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Star {
    pub ra: String,
    pub dec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cen: Option<String>,
    pub story: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarRegistration {
    pub address: String,
    pub star: Star,
}

/// Keeps the first `limit` space-separated words of `text`.
pub fn limit_words(text: &str, limit: usize) -> String {
    text.split(' ').take(limit).collect::<Vec<_>>().join(" ")
}

impl StarRegistration {
    /// Validates the registration and produces the block body stored on chain.
    pub fn into_block_body(self, word_limit: usize) -> Result<Value> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ChainError::InvalidPayload("address is required".to_string()));
        }
        if self.star.story.trim().is_empty() {
            return Err(ChainError::InvalidPayload(
                "star story must not be empty".to_string(),
            ));
        }
        if !self.star.story.is_ascii() {
            return Err(ChainError::InvalidPayload(
                "star story must be ASCII text".to_string(),
            ));
        }

        let story = limit_words(&self.star.story, word_limit);
        let shaped = StarRegistration {
            address: address.to_string(),
            star: Star {
                story: hex::encode(story.as_bytes()),
                ..self.star
            },
        };
        Ok(serde_json::to_value(shaped)?)
    }
}

fn star_owner(body: &Value) -> Option<&str> {
    body.get("star")?;
    body.get("address")?.as_str()
}

/// Adds `star.storyDecoded` to a star block body for display. Bodies that
/// are not star registrations are left as they are.
pub fn decode_story(block: &mut Block) {
    let Some(star) = block.body.get_mut("star").and_then(Value::as_object_mut) else {
        return;
    };
    let decoded = star
        .get("story")
        .and_then(Value::as_str)
        .and_then(|story| hex::decode(story).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

    if let Some(decoded) = decoded {
        star.insert("storyDecoded".to_string(), Value::String(decoded));
    }
}

/// Every star registered by `address`, stories decoded.
pub fn stars_by_address(ledger: &Ledger, address: &str) -> Result<Vec<Block>> {
    Ok(ledger
        .blocks()?
        .into_iter()
        .filter(|block| !block.is_genesis() && star_owner(&block.body) == Some(address))
        .map(|mut block| {
            decode_story(&mut block);
            block
        })
        .collect())
}

/// The star block with the given hash, story decoded.
pub fn star_by_hash(ledger: &Ledger, hash: &str) -> Result<Option<Block>> {
    Ok(ledger.find_by_hash(hash)?.map(|mut block| {
        decode_story(&mut block);
        block
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use serde_json::json;

    fn registration(address: &str, story: &str) -> StarRegistration {
        StarRegistration {
            address: address.to_string(),
            star: Star {
                ra: "16h 29m 1.0s".to_string(),
                dec: "-26° 29' 24.9".to_string(),
                mag: None,
                cen: Some("Scorpius".to_string()),
                story: story.to_string(),
            },
        }
    }

    #[test]
    fn test_limit_words() {
        assert_eq!(limit_words("a b c d", 2), "a b");
        assert_eq!(limit_words("a b", 5), "a b");
        let long = vec!["w"; 300].join(" ");
        assert_eq!(limit_words(&long, STORY_WORD_LIMIT).split(' ').count(), 250);
    }

    #[test]
    fn test_body_has_hex_story() {
        let body = registration("addr", "Found star")
            .into_block_body(STORY_WORD_LIMIT)
            .unwrap();
        assert_eq!(body["address"], "addr");
        assert_eq!(body["star"]["story"], hex::encode("Found star"));
        assert_eq!(body["star"]["cen"], "Scorpius");
        assert!(body["star"].get("mag").is_none());
    }

    #[test]
    fn test_rejects_bad_stories() {
        assert!(matches!(
            registration("addr", "   ").into_block_body(STORY_WORD_LIMIT),
            Err(ChainError::InvalidPayload(_))
        ));
        assert!(matches!(
            registration("addr", "étoile").into_block_body(STORY_WORD_LIMIT),
            Err(ChainError::InvalidPayload(_))
        ));
        assert!(matches!(
            registration("", "story").into_block_body(STORY_WORD_LIMIT),
            Err(ChainError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_body_address_is_trimmed() {
        let ledger = Ledger::open(Box::new(InMemoryPersistence::new())).unwrap();
        let body = registration(" addrX ", "padded owner")
            .into_block_body(STORY_WORD_LIMIT)
            .unwrap();
        assert_eq!(body["address"], "addrX");

        ledger.append(body).unwrap();
        assert_eq!(stars_by_address(&ledger, "addrX").unwrap().len(), 1);
    }

    #[test]
    fn test_decode_story_leaves_genesis_alone() {
        let ledger = Ledger::open(Box::new(InMemoryPersistence::new())).unwrap();
        let mut genesis = ledger.get_block(0).unwrap();
        let before = genesis.clone();
        decode_story(&mut genesis);
        assert_eq!(genesis, before);
    }

    #[test]
    fn test_lookups() {
        let ledger = Ledger::open(Box::new(InMemoryPersistence::new())).unwrap();
        let mine = ledger
            .append(registration("me", "first light").into_block_body(250).unwrap())
            .unwrap();
        ledger
            .append(registration("you", "other").into_block_body(250).unwrap())
            .unwrap();
        ledger.append(json!("plain entry")).unwrap();

        let stars = stars_by_address(&ledger, "me").unwrap();
        assert_eq!(stars.len(), 1);
        assert_eq!(stars[0].body["star"]["storyDecoded"], "first light");

        let by_hash = star_by_hash(&ledger, &mine.hash).unwrap().unwrap();
        assert_eq!(by_hash.height, mine.height);
        assert_eq!(by_hash.body["star"]["storyDecoded"], "first light");
        // Display decoding never touches the stored record.
        assert!(ledger.validate_block(mine.height).unwrap());
    }
}
