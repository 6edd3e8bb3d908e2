use std::fmt::Write as _;

use crate::models::parameters::ParsedParameters;
use crate::models::rules::{GenerationRules, Priority};
use crate::models::validation::ValidationReport;

const FORMAT_SECTION: &str = "【格式要求】
- 代码使用Markdown代码块格式
- 数学公式使用LaTeX语法
- 重要概念使用加粗强调
- 步骤说明使用有序列表

【输出格式】
请按照以下JSON格式返回，不要添加任何额外内容：
[
  {
    \"question\": \"问题内容（必须与学习目标和知识点相关）\",
    \"options\": [\"A. 选项内容\", \"B. 选项内容\", \"C. 选项内容\", \"D. 选项内容\"],
    \"correctAnswer\": \"A\",
    \"explanation\": \"详细的答案解析（必须说明与学习目标和知识点的关联）\",
    \"relatedGoal\": \"关联的学习目标\",
    \"relatedKnowledgePoint\": \"关联的知识点\"
  }
]";

fn numbered(out: &mut String, items: &[String]) {
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, item);
    }
}

/// The rule-derived sections, each already titled.
pub fn rule_sections(rules: &GenerationRules) -> Vec<String> {
    let mut sections = Vec::new();

    if !rules.topic_focus.is_empty() {
        let focus: Vec<&str> = rules
            .topic_focus
            .iter()
            .map(|f| f.description.as_str())
            .collect();
        sections.push(format!("【题目重点】\n必须重点考察：{}", focus.join("、")));
    }

    if !rules.question_distribution.is_empty() {
        let lines: Vec<String> = rules
            .question_distribution
            .iter()
            .map(|d| format!("- \"{}\"：{}", d.point, d.description))
            .collect();
        sections.push(format!(
            "【知识点分布】\n题目必须覆盖以下知识点，确保每个知识点至少有一道题：\n{}",
            lines.join("\n")
        ));
    }

    let high: Vec<String> = rules
        .content_requirements
        .iter()
        .filter(|r| r.priority == Priority::High)
        .map(|r| format!("- [必须] {}", r.text))
        .collect();
    let medium: Vec<String> = rules
        .content_requirements
        .iter()
        .filter(|r| r.priority == Priority::Medium)
        .map(|r| format!("- [建议] {}", r.text))
        .collect();
    if !high.is_empty() || !medium.is_empty() {
        let lines: Vec<String> = high.into_iter().chain(medium).collect();
        sections.push(format!("【内容要求】\n{}", lines.join("\n")));
    }

    if !rules.validation_criteria.is_empty() {
        let lines: Vec<String> = rules
            .validation_criteria
            .iter()
            .map(|c| format!("- {}", c.description))
            .collect();
        sections.push(format!(
            "【验证标准】\n生成的内容必须满足以下标准：\n{}",
            lines.join("\n")
        ));
    }

    sections
}

pub fn build_prompt(
    topic: &str,
    difficulty_label: &str,
    count: usize,
    parsed: &ParsedParameters,
    rules: &GenerationRules,
) -> String {
    let mut prompt = format!(
        "请为\"{}\"主题生成{}道{}难度的选择题。\n\n",
        topic, count, difficulty_label
    );

    let goals = &parsed.learning_goals;
    if goals.has_goals {
        prompt.push_str("【学习目标】\n");
        numbered(&mut prompt, &goals.goals);
        prompt.push_str(
            "\n重要：每道题目必须直接评估上述学习目标的达成情况。题目内容必须与学习目标高度相关，不能生成无关的题目。\n\n",
        );
    }

    let scope = &parsed.knowledge_points;
    if scope.has_points {
        prompt.push_str("【知识点范围】\n");
        if !scope.points.is_empty() {
            prompt.push_str("必须包含的知识点：\n");
            numbered(&mut prompt, &scope.points);
        }
        if !scope.domains.is_empty() {
            prompt.push_str("\n必须包含的知识域：\n");
            numbered(&mut prompt, &scope.domains);
        }
        if !scope.boundaries.is_empty() {
            prompt.push_str("\n明确排除的内容：\n");
            numbered(&mut prompt, &scope.boundaries);
        }
        prompt.push_str(
            "\n重要：每道题目必须明确涉及上述知识点之一，不能生成超出范围或无关的题目。\n\n",
        );
    }

    let sections = rule_sections(rules);
    if !sections.is_empty() {
        prompt.push_str(&sections.join("\n\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(FORMAT_SECTION);
    prompt
}

/// `base` with a closing section restating what the last attempt missed.
pub fn build_regeneration_prompt(
    base: &str,
    report: &ValidationReport,
    parsed: &ParsedParameters,
) -> String {
    let mut prompt = String::with_capacity(base.len() + 256);
    prompt.push_str(base);
    prompt.push_str("\n\n【上次生成未满足的要求】\n");

    for (_, axis) in report.failed_axes() {
        let _ = writeln!(prompt, "- {}", axis.message);
    }

    let missing = &report.knowledge_coverage.missing;
    if !missing.is_empty() {
        let _ = writeln!(prompt, "- 以下知识点尚未覆盖，必须各出至少一道题：{}", missing.join("、"));
    }

    if !parsed.knowledge_points.boundaries.is_empty() {
        let _ = writeln!(
            prompt,
            "- 仍然不得涉及：{}",
            parsed.knowledge_points.boundaries.join("、")
        );
    }

    let _ = write!(
        prompt,
        "请严格按照{}难度和上述全部要求重新生成，只返回JSON数组。",
        parsed.difficulty.label()
    );
    prompt
}
