use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use switchboard_core::types::SessionKey;

use crate::frames::ReplyFrame;

/// Replies that have not been acknowledged by the relay yet, in send order.
///
/// Every entry gets a sequence number so the connection task can tell which
/// ones it has already written on the current connection. On a new
/// connection everything still here is written again.
#[derive(Debug)]
pub struct Outbox {
    entries: VecDeque<(u64, ReplyFrame)>,
    next_seq: u64,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    /// Queue a reply. Hands the frame back when the outbox is full.
    pub fn push(&mut self, frame: ReplyFrame) -> Result<u64, ReplyFrame> {
        if self.entries.len() >= self.capacity {
            return Err(frame);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back((seq, frame));
        Ok(seq)
    }

    /// Drop the reply with `id`. Returns `false` for unknown or repeated acks.
    pub fn ack(&mut self, id: &str) -> bool {
        match self.entries.iter().position(|(_, f)| f.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Entries with a sequence number of at least `seq`, oldest first.
    pub fn since(&self, seq: u64) -> Vec<(u64, ReplyFrame)> {
        self.entries
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bounded memory of recently seen envelope ids.
#[derive(Debug)]
pub struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`. Returns `false` if it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    /// Forget `id` so a redelivery of it is accepted again.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.order.retain(|seen| seen != id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Where replies for one session go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub chat_id: String,
    pub last_envelope: String,
}

/// Reply routes keyed by session, holding at most `capacity` entries.
///
/// Refreshing a route makes it the newest; when full, the session that has
/// been quiet the longest is forgotten.
#[derive(Debug)]
pub struct Routes {
    routes: HashMap<SessionKey, (u64, Route)>,
    by_age: BTreeMap<u64, SessionKey>,
    next_stamp: u64,
    capacity: usize,
}

impl Routes {
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: HashMap::new(),
            by_age: BTreeMap::new(),
            next_stamp: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, key: SessionKey, route: Route) {
        if let Some((stamp, _)) = self.routes.remove(&key) {
            self.by_age.remove(&stamp);
        } else if self.routes.len() >= self.capacity {
            if let Some((_, oldest)) = self.by_age.pop_first() {
                self.routes.remove(&oldest);
            }
        }
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.by_age.insert(stamp, key.clone());
        self.routes.insert(key, (stamp, route));
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Route> {
        self.routes.get(key).map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
