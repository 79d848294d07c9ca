pub const MAX_INSIGHTS: usize = 5;
pub const MAX_TOP_LINKS: usize = 5;

const SUMMARY_KEYWORDS: &[&str] = &["executive summary", "key themes", "breaking news"];
const INSIGHT_KEYWORDS: &[&str] = &["insight", "notable", "must-read", "links"];

/// An executive digest split into summary sections, insights and links.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutiveSections {
    pub summary: String,
    pub insights: Vec<String>,
    pub top_links: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Summary,
    Insights,
}

struct Collector<'a> {
    section: Section,
    current: Vec<&'a str>,
    summary: Vec<String>,
    insights: Vec<String>,
}

impl<'a> Collector<'a> {
    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let block = self.current.join("\n");
        self.current.clear();
        match self.section {
            Section::Summary => self.summary.push(block),
            Section::Insights => self.insights.push(block),
        }
    }

    fn start(&mut self, section: Section, header: &'a str) {
        self.flush();
        self.section = section;
        self.current.push(header);
    }
}

fn mentions_any(line: &str, keywords: &[&str]) -> bool {
    let lower = line.to_lowercase();
    keywords.iter().any(|keyword| lower.contains(keyword))
}

/// Split an executive digest by its section keywords.
///
/// Lines mentioning a summary keyword open a summary section, lines
/// mentioning an insight keyword open an insight block, and bare URLs are
/// collected as links. The whole text is the summary when nothing matched.
pub fn parse_executive(text: &str) -> ExecutiveSections {
    let mut collector = Collector {
        section: Section::Summary,
        current: Vec::new(),
        summary: Vec::new(),
        insights: Vec::new(),
    };
    let mut top_links = Vec::new();

    for line in text.lines().map(str::trim) {
        if mentions_any(line, SUMMARY_KEYWORDS) {
            collector.start(Section::Summary, line);
        } else if mentions_any(line, INSIGHT_KEYWORDS) {
            collector.start(Section::Insights, line);
        } else if line.starts_with("http://") || line.starts_with("https://") {
            top_links.push(line.to_string());
        } else {
            collector.current.push(line);
        }
    }
    collector.flush();

    let mut insights = collector.insights;
    insights.truncate(MAX_INSIGHTS);
    top_links.truncate(MAX_TOP_LINKS);

    let summary = if collector.summary.is_empty() {
        text.to_string()
    } else {
        collector.summary.join("\n\n")
    };

    ExecutiveSections {
        summary,
        insights,
        top_links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "## Executive Summary
Open models closed the gap with frontier systems.

## Key Themes
Inference prices keep falling.

## Notable Developments
A lab shipped a reasoning model.

## Must-Read Links
https://example.com/open-model
https://example.com/pricing
";

    #[test]
    fn splits_summary_insights_and_links() {
        let sections = parse_executive(REPORT);

        assert!(sections.summary.starts_with("## Executive Summary\nOpen models"));
        assert!(sections.summary.contains("\n\n## Key Themes\nInference prices keep falling."));
        assert_eq!(sections.insights.len(), 2);
        assert!(sections.insights[0].starts_with("## Notable Developments\nA lab shipped"));
        assert_eq!(sections.insights[1].trim(), "## Must-Read Links");
        assert_eq!(
            sections.top_links,
            vec!["https://example.com/open-model", "https://example.com/pricing"]
        );
    }

    #[test]
    fn unstructured_text_is_all_summary() {
        let text = "Plain paragraph with no headers.\nSecond line.";
        let sections = parse_executive(text);
        assert_eq!(sections.summary, "Plain paragraph with no headers.\nSecond line.");
        assert!(sections.insights.is_empty());
        assert!(sections.top_links.is_empty());
    }

    #[test]
    fn insights_and_links_are_capped() {
        let mut text = String::new();
        for i in 0..8 {
            text.push_str(&format!("Insight {}\nDetail {}\nhttps://example.com/{}\n", i, i, i));
        }
        let sections = parse_executive(&text);
        assert_eq!(sections.insights.len(), MAX_INSIGHTS);
        assert_eq!(sections.top_links.len(), MAX_TOP_LINKS);
        assert_eq!(sections.insights[0], "Insight 0\nDetail 0");
        assert_eq!(sections.summary, text);
    }
}
