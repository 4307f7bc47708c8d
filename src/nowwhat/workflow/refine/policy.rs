// SPDX-License-Identifier: MIT

//! When are search results good enough to answer from?
//!
//! A batch is sufficient when it has at least `min_hits` hits and, if
//! relevance judging is on, enough of the judged hits are relevant both
//! in absolute count and as a share of those judged.

use crate::nowwhat::search::SearchHit;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SufficiencyPolicy {
    pub min_hits: usize,
    /// Count-only when false
    pub judge_relevance: bool,
    pub min_relevant_items: usize,
    pub min_pass_rate: f64,
    /// Hits sent to the relevance judge, in merge order
    pub max_items_for_evaluation: usize,
}

impl Default for SufficiencyPolicy {
    fn default() -> Self {
        Self {
            min_hits: 3,
            judge_relevance: true,
            min_relevant_items: 2,
            min_pass_rate: 0.6,
            max_items_for_evaluation: 10,
        }
    }
}

/// How relevance was decided
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMethod {
    /// Hit count alone; no judging happened
    Count,
    Model,
    /// Keyword matching after the model judge failed
    Keyword,
}

/// Relevance verdict for one hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemJudgment {
    /// Merge key of the judged hit
    pub key: String,
    pub title: String,
    pub is_relevant: bool,
    pub reasoning: String,
}

/// Model reply for a single judged item
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ItemEvaluation {
    /// Identifier of the item as given in the prompt
    pub link: String,
    pub is_relevant: bool,
    /// Short reason, at most 50 characters
    pub reasoning: String,
}

/// Model reply for a relevance batch
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ItemsEvaluation {
    pub items: Vec<ItemEvaluation>,
}

/// Outcome of a sufficiency check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sufficiency {
    pub sufficient: bool,
    pub hit_count: usize,
    pub evaluated: usize,
    pub relevant: usize,
    pub pass_rate: f64,
    pub method: JudgeMethod,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub judgments: Vec<ItemJudgment>,
}

impl SufficiencyPolicy {
    /// Whether the batch has enough hits to be worth judging
    pub fn needs_judging(&self, hit_count: usize) -> bool {
        self.judge_relevance && hit_count >= self.min_hits
    }

    /// The hits the judge looks at
    pub fn items_to_judge<'a>(&self, hits: &'a [SearchHit]) -> &'a [SearchHit] {
        &hits[..hits.len().min(self.max_items_for_evaluation)]
    }

    /// Count-only verdict, used when judging is off or there are too
    /// few hits to bother
    pub fn assess_count(&self, hit_count: usize) -> Sufficiency {
        let sufficient = hit_count >= self.min_hits;
        let reason = if sufficient {
            format!("{} hits (>= {})", hit_count, self.min_hits)
        } else {
            format!("only {} hits (< {})", hit_count, self.min_hits)
        };
        Sufficiency {
            sufficient,
            hit_count,
            evaluated: 0,
            relevant: 0,
            pass_rate: 0.0,
            method: JudgeMethod::Count,
            reason,
            judgments: Vec::new(),
        }
    }

    /// Combine hit count with relevance judgments
    pub fn assess(
        &self,
        hit_count: usize,
        judgments: Vec<ItemJudgment>,
        method: JudgeMethod,
    ) -> Sufficiency {
        if !self.needs_judging(hit_count) {
            return self.assess_count(hit_count);
        }

        let evaluated = judgments.len();
        let relevant = judgments.iter().filter(|j| j.is_relevant).count();
        let pass_rate = if evaluated == 0 {
            0.0
        } else {
            relevant as f64 / evaluated as f64
        };

        let sufficient =
            relevant >= self.min_relevant_items && pass_rate >= self.min_pass_rate;
        let reason = format!(
            "{}/{} relevant (pass rate {:.2}, need {} and {:.2})",
            relevant, evaluated, pass_rate, self.min_relevant_items, self.min_pass_rate
        );

        Sufficiency {
            sufficient,
            hit_count,
            evaluated,
            relevant,
            pass_rate,
            method,
            reason,
            judgments,
        }
    }
}

/// Map a model reply onto the judged hits.
///
/// Hits the model left out count as not relevant.
pub fn judgments_from_model(hits: &[SearchHit], reply: &ItemsEvaluation) -> Vec<ItemJudgment> {
    hits.iter()
        .map(|hit| {
            let key = hit.merge_key();
            match reply.items.iter().find(|item| item.link.trim() == key) {
                Some(item) => ItemJudgment {
                    key,
                    title: hit.title.clone(),
                    is_relevant: item.is_relevant,
                    reasoning: item.reasoning.clone(),
                },
                None => ItemJudgment {
                    key,
                    title: hit.title.clone(),
                    is_relevant: false,
                    reasoning: "not judged".to_string(),
                },
            }
        })
        .collect()
}

/// A hit is relevant when its title or description contains any
/// whitespace-separated token of the query
pub fn keyword_judgments(query: &str, hits: &[SearchHit]) -> Vec<ItemJudgment> {
    let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

    hits.iter()
        .map(|hit| {
            let haystack = format!("{} {}", hit.title, hit.description).to_lowercase();
            let matched = tokens.iter().find(|t| haystack.contains(t.as_str()));
            ItemJudgment {
                key: hit.merge_key(),
                title: hit.title.clone(),
                is_relevant: matched.is_some(),
                reasoning: match matched {
                    Some(t) => format!("keyword '{}' matched", t),
                    None => "no query keyword".to_string(),
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nowwhat::search::SourceTag;

    fn hits(n: usize) -> Vec<SearchHit> {
        (0..n)
            .map(|i| {
                SearchHit::new(SourceTag::NaverMap, format!("삼겹살 {}", i), format!("https://x/{}", i))
            })
            .collect()
    }

    fn judged(relevant: &[bool]) -> Vec<ItemJudgment> {
        relevant
            .iter()
            .enumerate()
            .map(|(i, r)| ItemJudgment {
                key: format!("https://x/{}", i),
                title: format!("t{}", i),
                is_relevant: *r,
                reasoning: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_too_few_hits_skips_judging() {
        let policy = SufficiencyPolicy::default();
        assert!(!policy.needs_judging(2));

        let verdict = policy.assess(2, judged(&[true, true]), JudgeMethod::Model);
        assert!(!verdict.sufficient);
        assert_eq!(verdict.method, JudgeMethod::Count);
    }

    #[test]
    fn test_count_alone_is_not_enough() {
        let policy = SufficiencyPolicy::default();
        let verdict = policy.assess(5, judged(&[true, false, false, false, false]), JudgeMethod::Model);
        assert!(!verdict.sufficient);
        assert_eq!(verdict.relevant, 1);
        assert_eq!(verdict.pass_rate, 0.2);
    }

    #[test]
    fn test_pass_rate_and_minimum_relevant() {
        let policy = SufficiencyPolicy::default();

        let verdict = policy.assess(5, judged(&[true, true, true, false, false]), JudgeMethod::Model);
        assert!(verdict.sufficient);

        // 2/4 relevant meets the count but not the 0.6 pass rate
        let verdict = policy.assess(4, judged(&[true, true, false, false]), JudgeMethod::Model);
        assert!(!verdict.sufficient);
    }

    #[test]
    fn test_count_only_policy() {
        let policy = SufficiencyPolicy {
            judge_relevance: false,
            ..Default::default()
        };
        assert!(!policy.needs_judging(10));
        assert!(policy.assess(3, Vec::new(), JudgeMethod::Model).sufficient);
    }

    #[test]
    fn test_items_to_judge_is_capped() {
        let policy = SufficiencyPolicy::default();
        let all = hits(15);
        assert_eq!(policy.items_to_judge(&all).len(), 10);
        assert_eq!(policy.items_to_judge(&all[..4]).len(), 4);
    }

    #[test]
    fn test_model_judgments_default_to_irrelevant() {
        let all = hits(2);
        let reply = ItemsEvaluation {
            items: vec![ItemEvaluation {
                link: "https://x/1".to_string(),
                is_relevant: true,
                reasoning: "삼겹살 전문점".to_string(),
            }],
        };

        let judgments = judgments_from_model(&all, &reply);
        assert!(!judgments[0].is_relevant);
        assert!(judgments[1].is_relevant);
    }

    #[test]
    fn test_keyword_judgments() {
        let all = vec![
            SearchHit::new(SourceTag::NaverBlog, "가능동 맛집 탐방", "https://b/1"),
            SearchHit::new(SourceTag::Web, "날씨 뉴스", "https://w/1"),
            SearchHit::new(SourceTag::Web, "Pork", "https://w/2").with_description("best 삼겹살"),
        ];

        let judgments = keyword_judgments("가능동 삼겹살", &all);
        let relevant: Vec<bool> = judgments.iter().map(|j| j.is_relevant).collect();
        assert_eq!(relevant, vec![true, false, true]);
    }
}
