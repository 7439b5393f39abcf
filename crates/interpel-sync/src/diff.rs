//! Change detection between two consecutive snapshots.

use std::collections::HashMap;

use interpel_core::{Inquiry, InquiryKey, KeyStrategy, NewAnswer};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffConfig {
    pub key_strategy: KeyStrategy,
    /// Suppress events for inquiries that reached a final answer.
    pub track_closure: bool,
}

/// A key whose reply count went down between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyCountAnomaly {
    pub key: InquiryKey,
    pub previous_reply_count: usize,
    pub current_reply_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOutcome {
    pub events: Vec<NewAnswer>,
    pub anomalies: Vec<ReplyCountAnomaly>,
    pub first_run: bool,
}

pub struct DiffEngine {
    config: DiffConfig,
}

impl DiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> DiffConfig {
        self.config
    }

    /// Events for every inquiry whose reply count grew, in `current` order.
    /// An empty `previous` is a first run and produces nothing.
    pub fn diff(&self, current: &[Inquiry], previous: &[Inquiry]) -> DiffOutcome {
        if previous.is_empty() {
            return DiffOutcome {
                first_run: true,
                ..DiffOutcome::default()
            };
        }

        let strategy = self.config.key_strategy;
        let previous_by_key: HashMap<InquiryKey, &Inquiry> = previous
            .iter()
            .filter(|item| !item.id.is_empty())
            .map(|item| (item.key(strategy), item))
            .collect();

        let mut outcome = DiffOutcome::default();
        for record in current.iter().filter(|item| !item.id.is_empty()) {
            if self.config.track_closure && record.closed {
                continue;
            }

            let key = record.key(strategy);
            match previous_by_key.get(&key) {
                Some(prior) if self.config.track_closure && prior.closed => {}
                Some(prior) if record.reply_count > prior.reply_count => {
                    outcome.events.push(new_answer(key, record, prior.reply_count));
                }
                Some(prior) if record.reply_count < prior.reply_count => {
                    warn!(
                        key = %key,
                        previous = prior.reply_count,
                        current = record.reply_count,
                        "reply count decreased; ignoring"
                    );
                    outcome.anomalies.push(ReplyCountAnomaly {
                        key,
                        previous_reply_count: prior.reply_count,
                        current_reply_count: record.reply_count,
                    });
                }
                Some(_) => {}
                None if record.reply_count > 0 => {
                    outcome.events.push(new_answer(key, record, 0));
                }
                None => {}
            }
        }
        outcome
    }
}

fn new_answer(key: InquiryKey, record: &Inquiry, previous_reply_count: usize) -> NewAnswer {
    let fresh = record.replies.get(previous_reply_count..).unwrap_or(&[]);

    let mut reply_authors: Vec<String> = Vec::new();
    for reply in fresh {
        if !reply.author.is_empty() && !reply_authors.contains(&reply.author) {
            reply_authors.push(reply.author.clone());
        }
    }

    let timing = record.timing();
    NewAnswer {
        key,
        id: record.id.clone(),
        kind: record.kind,
        title: record.title.clone(),
        url: record.url.clone(),
        submitters: record.submitters.clone(),
        submitter_ids: record.submitter_ids(),
        previous_reply_count,
        current_reply_count: record.reply_count,
        new_count: record.reply_count - previous_reply_count,
        has_prolongation: fresh.iter().any(|reply| reply.is_prolongation),
        reply_authors,
        submitted_on: timing.submitted_on,
        days_to_response: timing.days_to_response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpel_core::{InquiryKind, Link, Reply};

    fn record(id: &str, kind: InquiryKind, replies: usize) -> Inquiry {
        let mut inquiry = Inquiry::new(id, kind);
        inquiry.reply_count = replies;
        inquiry
    }

    fn int(id: &str, replies: usize) -> Inquiry {
        record(id, InquiryKind::Interpellation, replies)
    }

    fn engine() -> DiffEngine {
        DiffEngine::new(DiffConfig::default())
    }

    #[test]
    fn grown_reply_count_emits_one_event() {
        let previous = vec![int("1", 0)];
        let mut current = int("1", 2);
        current.title = "X".into();
        current.url = Link::Plain("u".into());

        let outcome = engine().diff(&[current], &previous);
        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.id, "1");
        assert_eq!(event.title, "X");
        assert_eq!(event.url.href(), "u");
        assert_eq!(
            (event.previous_reply_count, event.current_reply_count, event.new_count),
            (0, 2, 2)
        );
    }

    #[test]
    fn first_run_is_silent() {
        let outcome = engine().diff(&[int("1", 3)], &[]);
        assert!(outcome.first_run);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn closed_inquiries_stay_silent_when_tracking_closure() {
        let tracking = DiffEngine::new(DiffConfig {
            track_closure: true,
            ..DiffConfig::default()
        });
        let mut prior = int("2", 1);
        prior.closed = true;
        let mut now = int("2", 5);
        now.closed = true;
        assert!(tracking.diff(&[now.clone()], &[prior.clone()]).events.is_empty());

        now.closed = false;
        assert!(
            tracking.diff(&[now.clone()], &[prior]).events.is_empty(),
            "closed stays sticky through the previous snapshot"
        );

        let mut newly_closed = int("3", 1);
        newly_closed.closed = true;
        assert!(tracking.diff(&[newly_closed.clone()], &[int("9", 0)]).events.is_empty());

        assert_eq!(engine().diff(&[newly_closed], &[int("9", 0)]).events.len(), 1);
    }

    #[test]
    fn unseen_inquiry_with_replies_counts_from_zero() {
        let outcome = engine().diff(&[int("5", 0), int("6", 2)], &[int("1", 0)]);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].id, "6");
        assert_eq!(outcome.events[0].previous_reply_count, 0);
        assert_eq!(outcome.events[0].new_count, 2);
    }

    #[test]
    fn kinds_do_not_collide_under_combined_key() {
        let previous = vec![
            record("7", InquiryKind::Interpellation, 3),
            record("7", InquiryKind::WrittenQuestion, 0),
        ];
        let current = vec![
            record("7", InquiryKind::Interpellation, 3),
            record("7", InquiryKind::WrittenQuestion, 1),
        ];

        let outcome = engine().diff(&current, &previous);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, InquiryKind::WrittenQuestion);
        assert_eq!(outcome.events[0].key.to_string(), "7_ZAP");

        let by_id = DiffEngine::new(DiffConfig {
            key_strategy: KeyStrategy::IdOnly,
            ..DiffConfig::default()
        });
        let previous = vec![record("7", InquiryKind::Interpellation, 3)];
        let current = vec![record("7", InquiryKind::WrittenQuestion, 1)];
        let outcome = by_id.diff(&current, &previous);
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.anomalies.len(), 1);
    }

    #[test]
    fn decreasing_count_is_an_anomaly_not_an_event() {
        let outcome = engine().diff(&[int("4", 1)], &[int("4", 3)]);
        assert!(outcome.events.is_empty());
        assert_eq!(
            outcome.anomalies,
            vec![ReplyCountAnomaly {
                key: int("4", 0).key(KeyStrategy::IdAndKind),
                previous_reply_count: 3,
                current_reply_count: 1,
            }]
        );
    }

    #[test]
    fn prolongation_and_authors_only_consider_new_replies() {
        let mut prior = int("8", 1);
        prior.replies = vec![Reply {
            is_prolongation: true,
            author: "Minister Zdrowia".into(),
            ..Reply::default()
        }];
        let mut now = prior.clone();
        now.reply_count = 3;
        now.replies.push(Reply {
            author: "Minister Finansów".into(),
            ..Reply::default()
        });
        now.replies.push(Reply {
            author: "Minister Finansów".into(),
            ..Reply::default()
        });

        let outcome = engine().diff(&[now.clone()], &[prior.clone()]);
        let event = &outcome.events[0];
        assert!(!event.has_prolongation);
        assert_eq!(event.reply_authors, vec!["Minister Finansów".to_string()]);

        now.replies[2].is_prolongation = true;
        assert!(engine().diff(&[now], &[prior]).events[0].has_prolongation);
    }

    #[test]
    fn events_keep_current_order_and_skip_blank_ids() {
        let previous = vec![int("1", 0), int("2", 0), int("3", 0)];
        let current = vec![int("3", 1), int("", 4), int("1", 2), int("2", 0)];
        let ids: Vec<_> = engine()
            .diff(&current, &previous)
            .events
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["3".to_string(), "1".to_string()]);
    }

    #[test]
    fn event_iff_count_grew_or_unseen_with_replies() {
        let baseline = int("0", 0);
        for prev in [None, Some(0usize), Some(1), Some(3)] {
            for cur in [0usize, 1, 2, 3, 4] {
                let mut previous = vec![baseline.clone()];
                if let Some(count) = prev {
                    previous.push(int("k", count));
                }
                let outcome = engine().diff(&[int("k", cur)], &previous);
                let expected = match prev {
                    None => cur > 0,
                    Some(p) => cur > p,
                };
                assert_eq!(!outcome.events.is_empty(), expected, "prev={prev:?} cur={cur}");
                for event in &outcome.events {
                    assert!(event.new_count > 0);
                    assert_eq!(
                        event.new_count,
                        event.current_reply_count - event.previous_reply_count
                    );
                    assert_eq!(event.previous_reply_count, prev.unwrap_or(0));
                }
            }
        }
    }
}
