//! Free-text learning goals and knowledge-point scopes into structured
//! parameters. Every function here is total: any input string parses.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::parameters::{
    Completeness, Difficulty, KnowledgePoints, LearningGoals, ParsedParameters,
};

const CAPABILITY_VERBS: &[&str] = &[
    "理解", "掌握", "应用", "分析", "评估", "创造", "记忆", "综合", "评价", "熟悉", "精通", "熟练",
    "了解", "认识", "识别",
];

const SKILL_NOUNS: &[&str] = &[
    "编程", "代码", "算法", "数据结构", "函数", "类", "对象", "语法", "语义", "逻辑", "设计", "实现",
    "调试", "测试", "计算", "推导", "证明", "分析", "解决", "优化",
];

const ASSESSMENT_MODALS: &[&str] = &["能够", "可以", "应该", "必须", "需要"];

static EXCLUSION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)不包括|排除|除了|不涉及|不包含|not\s+including|excluding|except")
        .expect("exclusion marker pattern is valid")
});

static DOMAIN_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^.+?(基础|进阶|高级|入门|深入|原理|机制|实现|应用|设计|架构|模式|basics|fundamentals|principles)",
    )
    .expect("domain suffix pattern is valid")
});

fn is_sentence_break(c: char) -> bool {
    matches!(c, '。' | '\n' | '\r' | '；' | ';')
}

fn is_clause_break(c: char) -> bool {
    matches!(c, '，' | ',' | '。' | '\n')
}

fn is_item_break(c: char) -> bool {
    matches!(c, '，' | ',' | '；' | ';' | '\n' | '\r')
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

pub fn parse_learning_goals(text: &str) -> LearningGoals {
    let text = text.trim();
    if text.is_empty() {
        return LearningGoals::default();
    }

    let mut goals = LearningGoals {
        has_goals: true,
        ..LearningGoals::default()
    };

    for sentence in text.split(is_sentence_break) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        push_unique(&mut goals.goals, sentence);

        for clause in sentence.split(is_clause_break) {
            for verb in CAPABILITY_VERBS {
                if let Some(at) = clause.find(verb) {
                    push_unique(&mut goals.capabilities, &clause[at..]);
                }
            }
            if SKILL_NOUNS.iter().any(|noun| clause.contains(noun)) {
                push_unique(&mut goals.skills, clause);
            }
        }

        if ASSESSMENT_MODALS.iter().any(|m| sentence.contains(m)) {
            push_unique(&mut goals.assessment_criteria, sentence);
        }
    }

    goals
}

pub fn parse_knowledge_points(text: &str) -> KnowledgePoints {
    let text = text.trim();
    if text.is_empty() {
        return KnowledgePoints::default();
    }

    let mut scope = KnowledgePoints {
        has_points: true,
        ..KnowledgePoints::default()
    };

    for item in text.split(is_item_break) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        if EXCLUSION_MARKER.is_match(item) {
            let stripped = EXCLUSION_MARKER.replace_all(item, "");
            push_unique(&mut scope.boundaries, &stripped);
            continue;
        }

        if DOMAIN_SUFFIX.is_match(item) {
            push_unique(&mut scope.domains, item);
        } else {
            push_unique(&mut scope.points, item);
        }
    }

    scope
}

pub fn parse_all(
    learning_goals: Option<&str>,
    knowledge_points: Option<&str>,
    difficulty: &str,
) -> ParsedParameters {
    let learning_goals = parse_learning_goals(learning_goals.unwrap_or_default());
    let knowledge_points = parse_knowledge_points(knowledge_points.unwrap_or_default());

    let completeness = Completeness {
        has_learning_goals: learning_goals.has_goals,
        has_knowledge_points: knowledge_points.has_points,
        score: u8::from(learning_goals.has_goals) + u8::from(knowledge_points.has_points),
    };

    let parsed = ParsedParameters {
        learning_goals,
        knowledge_points,
        difficulty: Difficulty::parse(difficulty),
        completeness,
    };

    tracing::debug!(
        goals = parsed.learning_goals.goals.len(),
        capabilities = parsed.learning_goals.capabilities.len(),
        points = parsed.knowledge_points.points.len(),
        domains = parsed.knowledge_points.domains.len(),
        boundaries = parsed.knowledge_points.boundaries.len(),
        difficulty = parsed.difficulty.label(),
        "parameters parsed"
    );

    parsed
}
