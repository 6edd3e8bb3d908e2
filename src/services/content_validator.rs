//! Scores a generated item set on four independent axes.
//!
//! Scores are fractions in `[0, 1]` and always finite. An axis with nothing
//! to check (no knowledge points, no goals) scores 1.0; per-item axes score
//! 0.0 on an empty item set.

use crate::config::ValidationConfig;
use crate::models::item::{GeneratedItem, ValidationAnnotation};
use crate::models::parameters::{Difficulty, KnowledgePoints, LearningGoals, ParsedParameters};
use crate::models::validation::{AxisReport, ItemCheck, ValidationReport};

struct DifficultyKeywords {
    required: &'static [&'static str],
    avoid: &'static [&'static str],
}

fn keywords_for(difficulty: Difficulty) -> DifficultyKeywords {
    match difficulty {
        Difficulty::Easy => DifficultyKeywords {
            required: &["基础", "简单", "基本", "入门"],
            avoid: &["复杂", "高级", "深入", "综合"],
        },
        Difficulty::Medium => DifficultyKeywords {
            required: &["应用", "理解", "分析"],
            avoid: &["基础", "简单", "复杂", "高级"],
        },
        Difficulty::Hard => DifficultyKeywords {
            required: &["复杂", "高级", "深入", "综合", "分析", "评估"],
            avoid: &["基础", "简单", "入门"],
        },
    }
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn percent(score: f64) -> String {
    format!("{:.1}%", score * 100.0)
}

pub fn validate_knowledge_coverage(
    items: &[GeneratedItem],
    scope: &KnowledgePoints,
    threshold: f64,
) -> AxisReport {
    let required: Vec<&String> = scope.required().collect();
    if !scope.has_points || required.is_empty() {
        return AxisReport::vacuous("未指定知识点范围");
    }

    let lowered: Vec<String> = required.iter().map(|p| p.to_lowercase()).collect();
    let mut covered = vec![false; required.len()];
    let mut details = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let text = item.searchable_text();
        let tag = item
            .related_knowledge_point
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        let mut notes = Vec::new();
        for (i, point) in lowered.iter().enumerate() {
            if text.contains(point.as_str()) || (!tag.is_empty() && tag.contains(point.as_str())) {
                covered[i] = true;
                notes.push(required[i].clone());
            }
        }
        details.push(ItemCheck {
            item_index: index,
            passed: !notes.is_empty(),
            notes,
        });
    }

    let hits = covered.iter().filter(|c| **c).count();
    let score = ratio(hits, required.len());
    let missing: Vec<String> = required
        .iter()
        .zip(&covered)
        .filter(|(_, c)| !**c)
        .map(|(p, _)| (*p).clone())
        .collect();
    let valid = score >= threshold;
    let message = if valid {
        format!("知识点覆盖率：{}", percent(score))
    } else {
        format!("知识点覆盖率不足：{}，缺失：{}", percent(score), missing.join("、"))
    };

    AxisReport {
        valid,
        score,
        message,
        details,
        missing,
    }
}

pub fn validate_difficulty_match(
    items: &[GeneratedItem],
    difficulty: Difficulty,
    threshold: f64,
) -> AxisReport {
    let keywords = keywords_for(difficulty);
    let details: Vec<ItemCheck> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let text = item.searchable_text();
            let required = keywords.required.iter().find(|k| text.contains(*k));
            let avoided: Vec<String> = keywords
                .avoid
                .iter()
                .filter(|k| text.contains(*k))
                .map(|k| format!("包含回避词：{}", k))
                .collect();
            let mut notes = avoided;
            if required.is_none() {
                notes.push(format!("缺少{}难度关键词", difficulty.label()));
            }
            ItemCheck {
                item_index: index,
                passed: notes.is_empty(),
                notes,
            }
        })
        .collect();

    let score = ratio(details.iter().filter(|d| d.passed).count(), items.len());
    let valid = score >= threshold;
    let message = if valid {
        format!("难度匹配度：{}", percent(score))
    } else {
        format!("难度匹配度不足：{}", percent(score))
    };

    AxisReport {
        valid,
        score,
        message,
        details,
        missing: vec![],
    }
}

fn structural_issues(item: &GeneratedItem) -> Vec<String> {
    let mut issues = Vec::new();
    if item.question.trim().is_empty() {
        issues.push("缺少题目".to_string());
    }
    if item.options.len() < 2 {
        issues.push("缺少选项".to_string());
    } else if item.options.iter().any(|o| o.trim().is_empty()) {
        issues.push("选项格式错误".to_string());
    }
    if item.correct_answer.is_blank() {
        issues.push("缺少正确答案".to_string());
    } else if item.correct_answer.resolve_index(&item.options).is_none() {
        issues.push("正确答案不在选项中".to_string());
    }
    if item.explanation.trim().is_empty() {
        issues.push("缺少解析".to_string());
    }
    issues
}

pub fn validate_structural_compliance(items: &[GeneratedItem], threshold: f64) -> AxisReport {
    let details: Vec<ItemCheck> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let notes = structural_issues(item);
            ItemCheck {
                item_index: index,
                passed: notes.is_empty(),
                notes,
            }
        })
        .collect();

    let score = ratio(details.iter().filter(|d| d.passed).count(), items.len());
    let valid = score >= threshold;
    let message = if valid {
        format!("题目类型合规性：{}", percent(score))
    } else {
        format!("题目类型合规性不足：{}", percent(score))
    };

    AxisReport {
        valid,
        score,
        message,
        details,
        missing: vec![],
    }
}

/// Lower-cased tokens of at least two characters from every goal phrase.
fn relevance_tokens(goals: &LearningGoals) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let phrases = goals
        .goals
        .iter()
        .chain(&goals.capabilities)
        .chain(&goals.skills);
    for phrase in phrases {
        for token in phrase.split(|c: char| matches!(c, '，' | ',' | '。') || c.is_whitespace()) {
            if token.chars().count() >= 2 {
                let token = token.to_lowercase();
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
    }
    tokens
}

pub fn validate_goal_relevance(
    items: &[GeneratedItem],
    goals: &LearningGoals,
    threshold: f64,
) -> AxisReport {
    if !goals.has_goals {
        return AxisReport::vacuous("未指定学习目标");
    }

    let tokens = relevance_tokens(goals);
    let details: Vec<ItemCheck> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let text = item.searchable_text();
            let mut notes: Vec<String> = tokens
                .iter()
                .filter(|t| text.contains(t.as_str()))
                .take(3)
                .cloned()
                .collect();
            if let Some(goal) = item.related_goal.as_deref().filter(|g| !g.trim().is_empty()) {
                notes.push(format!("关联目标：{}", goal.trim()));
            }
            ItemCheck {
                item_index: index,
                passed: !notes.is_empty(),
                notes,
            }
        })
        .collect();

    let score = ratio(details.iter().filter(|d| d.passed).count(), items.len());
    let valid = score >= threshold;
    let message = if valid {
        format!("学习目标相关性：{}", percent(score))
    } else {
        format!("学习目标相关性不足：{}", percent(score))
    };

    AxisReport {
        valid,
        score,
        message,
        details,
        missing: vec![],
    }
}

pub fn validate_all(
    items: &[GeneratedItem],
    parsed: &ParsedParameters,
    config: &ValidationConfig,
) -> ValidationReport {
    let knowledge_coverage = validate_knowledge_coverage(
        items,
        &parsed.knowledge_points,
        config.min_knowledge_coverage,
    );
    let difficulty_match =
        validate_difficulty_match(items, parsed.difficulty, config.min_difficulty_match);
    let structural_compliance =
        validate_structural_compliance(items, config.min_structural_compliance);
    let goal_relevance =
        validate_goal_relevance(items, &parsed.learning_goals, config.min_goal_relevance);

    let scores = [
        knowledge_coverage.score,
        difficulty_match.score,
        structural_compliance.score,
        goal_relevance.score,
    ];
    let overall_score = scores.iter().sum::<f64>() / scores.len() as f64;
    let valid = knowledge_coverage.valid
        && difficulty_match.valid
        && structural_compliance.valid
        && goal_relevance.valid;

    let report = ValidationReport {
        valid,
        overall_score,
        knowledge_coverage,
        difficulty_match,
        structural_compliance,
        goal_relevance,
    };

    tracing::info!(
        valid = report.valid,
        overall = report.overall_score,
        coverage = report.knowledge_coverage.score,
        difficulty = report.difficulty_match.score,
        structure = report.structural_compliance.score,
        relevance = report.goal_relevance.score,
        "content validated"
    );
    report
}

/// One more generation is worth trying only for weak, small sets.
pub fn needs_regeneration(report: &ValidationReport, count: usize, config: &ValidationConfig) -> bool {
    report.overall_score < config.min_overall_score && count <= config.max_regeneration_count
}

fn check_for(axis: &AxisReport, index: usize) -> Option<&ItemCheck> {
    axis.details.iter().find(|d| d.item_index == index)
}

/// Attaches each item's per-axis outcome. Axes that checked nothing count
/// as passed.
pub fn annotate(items: &mut [GeneratedItem], report: &ValidationReport) {
    for (index, item) in items.iter_mut().enumerate() {
        let structure = check_for(&report.structural_compliance, index);
        item.validation = Some(ValidationAnnotation {
            structurally_compliant: structure.map_or(true, |c| c.passed),
            issues: structure.map(|c| c.notes.clone()).unwrap_or_default(),
            difficulty_match: check_for(&report.difficulty_match, index).map_or(true, |c| c.passed),
            goal_relevant: check_for(&report.goal_relevance, index).map_or(true, |c| c.passed),
            covered_points: check_for(&report.knowledge_coverage, index)
                .map(|c| c.notes.clone())
                .unwrap_or_default(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::CorrectAnswer;
    use crate::services::parameter_parser::parse_all;

    fn item(question: &str, explanation: &str) -> GeneratedItem {
        GeneratedItem {
            question: question.into(),
            options: vec!["A. 1".into(), "B. 2".into(), "C. 3".into(), "D. 4".into()],
            correct_answer: CorrectAnswer::Text("A. 1".into()),
            explanation: explanation.into(),
            difficulty: Difficulty::Medium,
            related_goal: None,
            related_knowledge_point: None,
            validation: None,
        }
    }

    fn parsed() -> ParsedParameters {
        parse_all(Some("理解求根公式的应用"), Some("求根公式,判别式,不包括虚数"), "中等")
    }

    #[test]
    fn fully_matching_items_pass() {
        let items = vec![
            item("应用求根公式求解方程", "理解判别式与根的关系"),
            item("分析判别式的符号", "应用求根公式可得"),
            item("理解求根公式在实际中的应用", "分析每一步"),
        ];
        let report = validate_all(&items, &parsed(), &ValidationConfig::default());
        assert!(report.valid, "{report:?}");
        assert!(report.overall_score >= 0.9);
        assert!(!needs_regeneration(&report, 3, &ValidationConfig::default()));
    }

    #[test]
    fn empty_item_set_has_finite_score() {
        let report = validate_all(&[], &parsed(), &ValidationConfig::default());
        assert!(report.overall_score.is_finite());
        assert!(!report.valid);
        assert_eq!(report.structural_compliance.score, 0.0);
        assert_eq!(report.knowledge_coverage.missing, vec!["求根公式", "判别式"]);
    }

    #[test]
    fn coverage_reports_missing_points() {
        let items = vec![item("应用求根公式", "理解")];
        let report =
            validate_knowledge_coverage(&items, &parsed().knowledge_points, 0.8);
        assert_eq!(report.score, 0.5);
        assert!(!report.valid);
        assert_eq!(report.missing, vec!["判别式"]);
        assert!(report.message.contains("缺失：判别式"));
    }

    #[test]
    fn coverage_accepts_related_point_tag() {
        let mut tagged = item("一道题", "解析");
        tagged.related_knowledge_point = Some("判别式".into());
        let scope = parse_all(None, Some("判别式"), "中等").knowledge_points;
        assert_eq!(validate_knowledge_coverage(&[tagged], &scope, 0.8).score, 1.0);
    }

    #[test]
    fn no_scope_or_goals_is_vacuously_valid() {
        let items = vec![item("q", "e")];
        let bare = parse_all(None, None, "中等");
        assert_eq!(
            validate_knowledge_coverage(&items, &bare.knowledge_points, 0.8).score,
            1.0
        );
        assert!(validate_goal_relevance(&items, &bare.learning_goals, 0.8).valid);
    }

    #[test]
    fn avoid_keywords_fail_difficulty() {
        let items = vec![item("一道基础题的应用", "简单"), item("应用题", "理解")];
        let report = validate_difficulty_match(&items, Difficulty::Medium, 0.7);
        assert_eq!(report.score, 0.5);
        assert!(!report.details[0].passed);
        assert!(report.details[1].passed);
    }

    #[test]
    fn structural_issues_are_listed() {
        let mut broken = item("", "");
        broken.options = vec!["A. 1".into()];
        broken.correct_answer = CorrectAnswer::Text("E".into());
        let report = validate_structural_compliance(&[broken], 0.9);
        assert_eq!(report.score, 0.0);
        let notes = &report.details[0].notes;
        assert!(notes.contains(&"缺少题目".to_string()));
        assert!(notes.contains(&"缺少选项".to_string()));
        assert!(notes.contains(&"正确答案不在选项中".to_string()));
        assert!(notes.contains(&"缺少解析".to_string()));
    }

    #[test]
    fn relation_tag_counts_for_relevance() {
        let goals = parse_all(Some("掌握链表反转"), None, "中等").learning_goals;
        let mut tagged = item("完全无关的问题", "无关");
        tagged.related_goal = Some("掌握链表反转".into());
        let untagged = item("完全无关的问题", "无关");
        let report = validate_goal_relevance(&[tagged, untagged], &goals, 0.8);
        assert_eq!(report.score, 0.5);
    }

    #[test]
    fn weak_large_sets_are_not_regenerated() {
        let report = validate_all(&[], &parsed(), &ValidationConfig::default());
        let config = ValidationConfig::default();
        assert!(needs_regeneration(&report, 10, &config));
        assert!(!needs_regeneration(&report, 11, &config));
    }

    #[test]
    fn annotate_attaches_per_item_results() {
        let mut items = vec![item("应用求根公式", "理解"), item("", "")];
        let report = validate_all(&items, &parsed(), &ValidationConfig::default());
        annotate(&mut items, &report);
        let first = items[0].validation.as_ref().unwrap();
        assert!(first.structurally_compliant);
        assert_eq!(first.covered_points, vec!["求根公式"]);
        let second = items[1].validation.as_ref().unwrap();
        assert!(!second.structurally_compliant);
        assert!(!second.issues.is_empty());
    }
}
