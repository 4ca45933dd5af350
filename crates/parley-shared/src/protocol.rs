use serde::{Deserialize, Serialize};

/// All wire protocol messages exchanged between a client and the relay.
///
/// Serialized as an internally tagged JSON object, e.g.
/// `{"type":"send","receiver":"bob","text":"hi"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Client announces its display name.
    Login { username: String },

    /// Relay accepted the login.
    LoginAck { message: String },

    /// Client addresses a message to another user. The sender is the
    /// authenticated name bound to the connection.
    Send { receiver: String, text: String },

    /// Relay forwards a persisted message to the receiver (and echoes it to
    /// the sender).
    Deliver {
        sender: String,
        receiver: String,
        text: String,
        timestamp: String,
    },

    /// Client asks for the stored conversation with `peer`.
    History {
        peer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },

    /// Answer to [`Envelope::History`], oldest message first.
    HistoryBatch {
        peer: String,
        messages: Vec<HistoryEntry>,
    },

    /// Rejection or failure notice.
    Error { message: String },
}

/// One stored message inside a [`Envelope::HistoryBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub timestamp: String,
}

impl Envelope {
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    /// Short name of the variant, as it appears in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Login { .. } => "login",
            Envelope::LoginAck { .. } => "login_ack",
            Envelope::Send { .. } => "send",
            Envelope::Deliver { .. } => "deliver",
            Envelope::History { .. } => "history",
            Envelope::HistoryBatch { .. } => "history_batch",
            Envelope::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Length in bytes of the JSON payload this envelope encodes to.
    pub fn encoded_len(&self) -> Result<usize, serde_json::Error> {
        self.to_json().map(|payload| payload.len())
    }

    /// Build a `HistoryBatch` from the newest `messages` whose payload fits in
    /// `max_len` bytes.
    ///
    /// `messages` is ordered oldest first; older entries are left out until
    /// the batch fits. Returns the batch and how many entries were left out.
    pub fn history_batch_within(
        peer: String,
        mut messages: Vec<HistoryEntry>,
        max_len: usize,
    ) -> Result<(Self, usize), serde_json::Error> {
        let mut total = Envelope::HistoryBatch {
            peer: peer.clone(),
            messages: Vec::new(),
        }
        .encoded_len()?;

        let mut kept = 0;
        for entry in messages.iter().rev() {
            // Entries after the first one are preceded by a comma.
            let len = serde_json::to_vec(entry)?.len() + usize::from(kept > 0);
            if total + len > max_len {
                break;
            }
            total += len;
            kept += 1;
        }

        let dropped = messages.len() - kept;
        messages.drain(..dropped);
        Ok((Envelope::HistoryBatch { peer, messages }, dropped))
    }
}
