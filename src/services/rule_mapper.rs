use crate::models::parameters::{Difficulty, ParsedParameters};
use crate::models::rules::{
    ContentRequirement, DifficultyProfile, Distribution, FocusKind, GenerationRules, Priority,
    TopicFocus, ValidationCriterion,
};

const DOMAIN_WEIGHT_FACTOR: f64 = 1.5;

fn focus_for(capability: &str) -> Vec<TopicFocus> {
    let mut found = Vec::new();
    if capability.contains("理解") || capability.contains("掌握") {
        found.push(TopicFocus {
            kind: FocusKind::Concept,
            weight: 0.4,
            description: "重点考察概念理解".to_string(),
        });
    }
    if capability.contains("应用") || capability.contains("使用") {
        found.push(TopicFocus {
            kind: FocusKind::Application,
            weight: 0.5,
            description: "重点考察实际应用".to_string(),
        });
    }
    if capability.contains("分析") || capability.contains("评估") {
        found.push(TopicFocus {
            kind: FocusKind::Analysis,
            weight: 0.6,
            description: "重点考察分析能力".to_string(),
        });
    }
    found
}

fn requirements_for(skill: &str) -> Vec<ContentRequirement> {
    let mut found = Vec::new();
    if skill.contains("代码") || skill.contains("编程") {
        found.push(ContentRequirement {
            text: "必须包含代码示例".to_string(),
            priority: Priority::High,
        });
    }
    if skill.contains("算法") || skill.contains("数据结构") {
        found.push(ContentRequirement {
            text: "必须涉及算法或数据结构".to_string(),
            priority: Priority::High,
        });
    }
    if skill.contains("计算") || skill.contains("推导") {
        found.push(ContentRequirement {
            text: "必须包含计算或推导过程".to_string(),
            priority: Priority::Medium,
        });
    }
    found
}

pub fn difficulty_profile(difficulty: Difficulty) -> DifficultyProfile {
    let (complexity, depth, scope) = match difficulty {
        Difficulty::Easy => ("low", "surface", "single"),
        Difficulty::Medium => ("medium", "moderate", "multiple"),
        Difficulty::Hard => ("high", "deep", "comprehensive"),
    };
    DifficultyProfile {
        complexity: complexity.to_string(),
        depth: depth.to_string(),
        scope: scope.to_string(),
    }
}

fn distribution(point: &str, weight: f64) -> Distribution {
    Distribution {
        point: point.to_string(),
        weight,
        min_count: 1,
        description: format!("必须包含关于\"{}\"的题目", point),
    }
}

pub fn map_parameters_to_rules(parsed: &ParsedParameters) -> GenerationRules {
    let mut rules = GenerationRules::default();

    let goals = &parsed.learning_goals;
    if goals.has_goals {
        for focus in goals.capabilities.iter().flat_map(|c| focus_for(c)) {
            if !rules.topic_focus.iter().any(|f| f.kind == focus.kind) {
                rules.topic_focus.push(focus);
            }
        }
        for requirement in goals.skills.iter().flat_map(|s| requirements_for(s)) {
            if !rules.content_requirements.contains(&requirement) {
                rules.content_requirements.push(requirement);
            }
        }
    }

    let scope = &parsed.knowledge_points;
    if scope.has_points {
        let total = scope.points.len() + scope.domains.len();
        let per_point = if total > 0 { 1.0 / total as f64 } else { 0.0 };

        for point in &scope.points {
            rules
                .question_distribution
                .push(distribution(point, per_point));
        }
        for domain in &scope.domains {
            rules
                .question_distribution
                .push(distribution(domain, per_point * DOMAIN_WEIGHT_FACTOR));
        }

        if !scope.boundaries.is_empty() {
            rules.content_requirements.push(ContentRequirement {
                text: format!("明确排除以下内容：{}", scope.boundaries.join("、")),
                priority: Priority::High,
            });
        }
    }

    let label = parsed.difficulty.label();
    rules.validation_criteria.push(ValidationCriterion {
        criterion: "difficulty".to_string(),
        level: label.to_string(),
        profile: difficulty_profile(parsed.difficulty),
        description: format!("题目难度必须符合{}级别要求", label),
    });

    rules
}
