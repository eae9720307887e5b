use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const QUESTION_FIELD: &str = "question";
pub const OPTION_PREFIX: &str = "option_";
pub const VOTES_PREFIX: &str = "votes_";
pub const UPDATES_PATTERN: &str = "updates:*";
pub const VOTE_UPDATE: &str = "voteUpdate";

pub fn poll_key(poll_id: &str) -> String {
    format!("poll:{poll_id}")
}

pub fn voted_key(poll_id: &str) -> String {
    format!("voted:{poll_id}")
}

pub fn votes_field(option_id: &str) -> String {
    format!("{VOTES_PREFIX}{option_id}")
}

pub fn updates_topic(poll_id: &str) -> String {
    format!("updates:{poll_id}")
}

/// Extracts the poll id from an `updates:{poll_id}` topic.
pub fn poll_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("updates"), Some(poll_id), None) if !poll_id.is_empty() => Some(poll_id),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: BTreeMap<String, String>,
    pub votes: BTreeMap<String, i64>,
}

impl Poll {
    /// Builds the initial hash fields for a poll with zeroed counters.
    pub fn initial_fields(question: &str, options: &[String]) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(options.len() * 2 + 1);
        fields.insert(QUESTION_FIELD.to_string(), question.to_string());

        for (index, label) in options.iter().enumerate() {
            fields.insert(format!("{OPTION_PREFIX}{index}"), label.clone());
            fields.insert(votes_field(&index.to_string()), "0".to_string());
        }

        fields
    }

    pub fn from_fields(id: &str, fields: &HashMap<String, String>) -> Self {
        let mut options = BTreeMap::new();

        for (key, value) in fields {
            if let Some(option_id) = key.strip_prefix(OPTION_PREFIX) {
                options.insert(option_id.to_string(), value.clone());
            }
        }

        Self {
            id: id.to_string(),
            question: fields.get(QUESTION_FIELD).cloned().unwrap_or_default(),
            options,
            votes: TallySnapshot::from_fields(id, fields).votes,
        }
    }
}

/// Full vote-count state of one poll at the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallySnapshot {
    pub poll_id: String,
    pub votes: BTreeMap<String, i64>,
}

impl TallySnapshot {
    pub fn from_fields(poll_id: &str, fields: &HashMap<String, String>) -> Self {
        let votes = fields
            .iter()
            .filter_map(|(key, value)| {
                let option_id = key.strip_prefix(VOTES_PREFIX)?;
                // unparsable counters read as zero
                Some((option_id.to_string(), value.parse().unwrap_or(0)))
            })
            .collect();

        Self {
            poll_id: poll_id.to_string(),
            votes,
        }
    }

    pub fn total(&self) -> i64 {
        self.votes.values().sum()
    }

    pub fn to_update(&self) -> TallyUpdate {
        TallyUpdate {
            kind: VOTE_UPDATE.to_string(),
            votes: self.votes.clone(),
        }
    }
}

/// Outbound frame, also the payload carried on the broadcast bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub votes: BTreeMap<String, i64>,
}

impl TallyUpdate {
    pub fn total(&self) -> i64 {
        self.votes.values().sum()
    }
}

/// Inbound frame from a client. The poll id comes from the connection route.
#[derive(Debug, Clone, Deserialize)]
pub struct VoteIntent {
    #[serde(alias = "optionId")]
    pub vote: String,
    #[serde(rename = "clientId", alias = "clientID")]
    pub client_id: String,
}

impl VoteIntent {
    pub fn is_complete(&self) -> bool {
        !self.vote.is_empty() && !self.client_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_round_trip() {
        assert_eq!(poll_id_from_topic(&updates_topic("p1")), Some("p1"));
        assert_eq!(poll_id_from_topic("updates:"), None);
        assert_eq!(poll_id_from_topic("updates:a:b"), None);
        assert_eq!(poll_id_from_topic("other:p1"), None);
    }

    #[test]
    fn test_poll_from_initial_fields() {
        let options = vec!["Cats".to_string(), "Dogs".to_string()];
        let fields = Poll::initial_fields("Pets?", &options);
        let poll = Poll::from_fields("p1", &fields);

        assert_eq!(poll.question, "Pets?");
        assert_eq!(poll.options.get("0").map(String::as_str), Some("Cats"));
        assert_eq!(poll.options.get("1").map(String::as_str), Some("Dogs"));
        assert_eq!(poll.votes.get("0"), Some(&0));
        assert_eq!(poll.votes.len(), 2);
    }

    #[test]
    fn test_snapshot_ignores_non_counter_fields() {
        let mut fields = HashMap::new();
        fields.insert("question".to_string(), "q".to_string());
        fields.insert("option_0".to_string(), "A".to_string());
        fields.insert("votes_0".to_string(), "3".to_string());
        fields.insert("votes_1".to_string(), "junk".to_string());

        let snapshot = TallySnapshot::from_fields("p1", &fields);
        assert_eq!(snapshot.votes.get("0"), Some(&3));
        assert_eq!(snapshot.votes.get("1"), Some(&0));
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn test_update_wire_format() {
        let mut votes = BTreeMap::new();
        votes.insert("0".to_string(), 1);
        votes.insert("1".to_string(), 0);
        let snapshot = TallySnapshot {
            poll_id: "p1".to_string(),
            votes,
        };

        let json = serde_json::to_string(&snapshot.to_update()).unwrap();
        assert_eq!(json, r#"{"type":"voteUpdate","votes":{"0":1,"1":0}}"#);
    }

    #[test]
    fn test_vote_intent_aliases() {
        let intent: VoteIntent = serde_json::from_str(r#"{"vote":"0","clientId":"c1"}"#).unwrap();
        assert_eq!(intent.vote, "0");
        assert_eq!(intent.client_id, "c1");

        let intent: VoteIntent =
            serde_json::from_str(r#"{"optionId":"1","clientID":"c2"}"#).unwrap();
        assert_eq!(intent.vote, "1");
        assert!(intent.is_complete());

        let intent: VoteIntent = serde_json::from_str(r#"{"vote":"","clientId":"c2"}"#).unwrap();
        assert!(!intent.is_complete());
    }
}
