//! Rolling chat statistics fed by inbound events.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::model::{ChatMessage, ChatStatistics};

const RATE_WINDOW: Duration = Duration::from_secs(60);
const TOP_N: usize = 5;

/// Maintains [`ChatStatistics`] for one stream session.
///
/// Counters only grow, except `active_users` which follows joins and
/// leaves. A server push replaces the snapshot wholesale; later inbound
/// messages keep counting from the pushed values.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    current: ChatStatistics,
    arrivals: VecDeque<Instant>,
    chatters: HashMap<String, u64>,
    emotes: HashMap<String, u64>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ChatStatistics {
        self.current.clone()
    }

    /// Count an inbound chat message received now.
    pub fn record_message(&mut self, message: &ChatMessage) {
        self.record_message_at(message, Instant::now());
    }

    pub fn record_message_at(&mut self, message: &ChatMessage, now: Instant) {
        let stats = &mut self.current;
        stats.total_messages += 1;
        if let Some(amount) = message.super_chat_amount.filter(|a| a.is_finite() && *a > 0.0) {
            stats.super_chat_total += amount;
            stats.super_chat_revenue += amount;
        }

        self.arrivals.push_back(now);
        while let Some(&first) = self.arrivals.front() {
            if now.saturating_duration_since(first) >= RATE_WINDOW {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
        self.current.messages_per_minute = self.arrivals.len() as f64;

        *self.chatters.entry(message.user_id.clone()).or_default() += 1;
        for emote in &message.emotes {
            *self.emotes.entry(emote.name.clone()).or_default() += 1;
        }
        self.current.top_chatters = top_keys(&self.chatters);
        if !self.emotes.is_empty() {
            self.current.popular_emotes = top_keys(&self.emotes);
        }
    }

    pub fn user_joined(&mut self) {
        let stats = &mut self.current;
        stats.active_users += 1;
        stats.peak_viewers = stats.peak_viewers.max(stats.active_users);
    }

    /// Decrement active users, floored at zero.
    pub fn user_left(&mut self) {
        self.current.active_users = self.current.active_users.saturating_sub(1);
    }

    /// Replace the snapshot with a server-pushed one.
    pub fn replace(&mut self, stats: ChatStatistics) {
        self.current = stats;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Keys ordered by descending count, ties broken by key.
fn top_keys(counts: &HashMap<String, u64>) -> Vec<String> {
    let mut ranked: Vec<(&String, &u64)> = counts.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(TOP_N).map(|(k, _)| k.clone()).collect()
}
