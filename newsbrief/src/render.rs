//! Briefing → Markdown. Pure and deterministic: the same briefing always renders to the
//! same bytes.

use std::collections::HashSet;
use std::fmt::Write;

use crate::error::RenderError;
use crate::model::{Briefing, BriefingItem, Section, SectionContent, Takeaways};

pub const TITLE: &str = "今日新闻";
pub const TAKEAWAYS_HEADING: &str = "## Key Takeaways";
const GREETING: &str = "> 早上好！以下是为你整理的今日重点资讯。";
const RULE: &str = "---";

pub fn render(briefing: &Briefing) -> Result<String, RenderError> {
    validate(briefing)?;

    let mut sections: Vec<&Section> = briefing.sections.iter().collect();
    sections.sort_by(|a, b| {
        (a.priority, a.order, &a.category).cmp(&(b.priority, b.order, &b.category))
    });

    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = writeln!(out, "# {} | {}", TITLE, briefing.date.format("%Y-%m-%d"));
    out.push('\n');
    out.push_str(GREETING);
    out.push('\n');

    let gaps: Vec<String> = sections
        .iter()
        .filter_map(|s| s.degraded_reason().map(|r| format!("{}（{}）", s.category, r.describe())))
        .collect();
    if !gaps.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "> ⚠️ 以下分类缺少数据：{}", gaps.join("；"));
    }

    for section in sections {
        out.push('\n');
        out.push_str(RULE);
        out.push_str("\n\n");
        render_section(&mut out, section);
    }

    out.push('\n');
    out.push_str(RULE);
    out.push_str("\n\n");
    out.push_str(TAKEAWAYS_HEADING);
    out.push_str("\n\n");
    match &briefing.key_takeaways {
        Takeaways::Points(points) if !points.is_empty() => {
            for (i, point) in points.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, point.trim());
            }
        }
        _ => out.push_str("> ⚠️ 今日要点暂未生成（摘要服务不可用）。\n"),
    }

    Ok(out)
}

fn render_section(out: &mut String, section: &Section) {
    let _ = writeln!(out, "## {}", section.category);

    match &section.content {
        SectionContent::Items(items) => {
            let mut items: Vec<&BriefingItem> = items.iter().collect();
            items.sort_by_key(|item| item.source_index);
            for item in items {
                out.push('\n');
                render_item(out, item);
            }
        }
        SectionContent::Degraded(reason) => {
            let _ = writeln!(out, "\n> ⚠️ 本分类暂无数据：{}。", reason.describe());
        }
    }
}

fn render_item(out: &mut String, item: &BriefingItem) {
    let _ = writeln!(out, "### {}\n", item.headline.trim());
    match item.points {
        Some(points) => {
            let _ = writeln!(out, "**来源：** {}（{} points）\n", item.source, points);
        }
        None => {
            let _ = writeln!(out, "**来源：** {}\n", item.source);
        }
    }
    let _ = writeln!(out, "**摘要：** {}\n", item.summary.trim());
    let _ = writeln!(out, "**为何重要：** {}", item.why_it_matters.trim());
    if let Some(url) = item.url.as_deref().filter(|u| !u.is_empty()) {
        let _ = writeln!(out, "\n[原文链接]({})", url);
    }
}

fn validate(briefing: &Briefing) -> Result<(), RenderError> {
    let mut names = HashSet::new();
    for section in &briefing.sections {
        if section.category.trim().is_empty() {
            return Err(RenderError::Malformed("section without a category name".into()));
        }
        if !names.insert(section.category.as_str()) {
            return Err(RenderError::Malformed(format!(
                "category '{}' appears twice",
                section.category
            )));
        }
        for item in section.items() {
            if item.headline.trim().is_empty()
                || item.summary.trim().is_empty()
                || item.why_it_matters.trim().is_empty()
            {
                return Err(RenderError::Malformed(format!(
                    "incomplete item in '{}'",
                    section.category
                )));
            }
        }
    }
    Ok(())
}
