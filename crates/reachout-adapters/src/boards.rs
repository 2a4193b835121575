//! Card-based HTML job boards.

use std::sync::OnceLock;

use async_trait::async_trait;
use reachout_core::JobPosting;
use reachout_storage::TokenBucketConfig;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::{validate_query, AdapterError, JobSource};

/// How a board encodes the query and the page in its search URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `?{query_param}=q&{page_param}=n`
    PageNumber {
        query_param: &'static str,
        page_param: &'static str,
    },
    /// `?{query_param}=q&{offset_param}=(n-1)*per_page`
    Offset {
        query_param: &'static str,
        offset_param: &'static str,
        per_page: u32,
    },
    /// `/{query-slug}-jobs-{n}`
    PathSlug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSelectors {
    pub card: &'static str,
    pub title: &'static str,
    pub company: Option<&'static str>,
    pub location: &'static str,
    pub link: &'static str,
    pub skills: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlBoard {
    pub source_id: &'static str,
    pub display_name: &'static str,
    pub search_url: &'static str,
    pub pagination: Pagination,
    /// Prepended to relative job links.
    pub link_base: &'static str,
    /// Used when the board does not print the employer on each card.
    pub fixed_company: Option<&'static str>,
    pub selectors: CardSelectors,
    pub requests_per_minute: u32,
}

pub const GITHUB_CAREERS: HtmlBoard = HtmlBoard {
    source_id: "github-careers",
    display_name: "GitHub",
    search_url: "https://www.github.careers/careers-home/jobs",
    pagination: Pagination::PageNumber {
        query_param: "keywords",
        page_param: "page",
    },
    link_base: "https://www.github.careers",
    fixed_company: Some("GitHub"),
    selectors: CardSelectors {
        card: ".job-result-card, .job-results-container .job",
        title: ".job-title",
        company: None,
        location: ".job-location, .location",
        link: "a.job-title-link, a[href*='/jobs/']",
        skills: None,
    },
    requests_per_minute: 10,
};

pub const LINKEDIN: HtmlBoard = HtmlBoard {
    source_id: "linkedin",
    display_name: "LinkedIn",
    search_url: "https://www.linkedin.com/jobs/search/",
    pagination: Pagination::Offset {
        query_param: "keywords",
        offset_param: "start",
        per_page: 25,
    },
    link_base: "https://www.linkedin.com",
    fixed_company: None,
    selectors: CardSelectors {
        card: ".job-search-card",
        title: ".job-search-card__title, .base-search-card__title",
        company: Some(".job-search-card__subtitle, .base-search-card__subtitle"),
        location: ".job-search-card__location",
        link: "a.job-search-card__title, a.base-card__full-link",
        skills: None,
    },
    requests_per_minute: 5,
};

pub const INDEED: HtmlBoard = HtmlBoard {
    source_id: "indeed",
    display_name: "Indeed",
    search_url: "https://www.indeed.com/jobs",
    pagination: Pagination::Offset {
        query_param: "q",
        offset_param: "start",
        per_page: 10,
    },
    link_base: "https://www.indeed.com",
    fixed_company: None,
    selectors: CardSelectors {
        card: ".job_seen_beacon",
        title: ".jobTitle",
        company: Some(".companyName"),
        location: ".companyLocation",
        link: ".jcs-JobTitle",
        skills: None,
    },
    requests_per_minute: 5,
};

pub const NAUKRI: HtmlBoard = HtmlBoard {
    source_id: "naukri",
    display_name: "Naukri",
    search_url: "https://www.naukri.com",
    pagination: Pagination::PathSlug,
    link_base: "https://www.naukri.com",
    fixed_company: None,
    selectors: CardSelectors {
        card: ".jobTuple",
        title: ".title",
        company: Some(".companyInfo"),
        location: ".location",
        link: ".title",
        skills: Some(".tags li"),
    },
    requests_per_minute: 5,
};

pub const BUILTIN_SOURCES: [HtmlBoard; 4] = [GITHUB_CAREERS, LINKEDIN, INDEED, NAUKRI];

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn JobSource>> {
    BUILTIN_SOURCES
        .iter()
        .find(|board| board.source_id == source_id)
        .map(|board| Box::new(*board) as Box<dyn JobSource>)
}

fn selector(raw: &str) -> Result<Selector, AdapterError> {
    Selector::parse(raw).map_err(|e| AdapterError::Selector {
        selector: raw.to_string(),
        reason: e.to_string(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn first_text(card: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn first_attr(card: &ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

fn query_slug(query: &str) -> String {
    let mut slug = String::with_capacity(query.len());
    for ch in query.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn skill_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(javascript|python|react|node|typescript|go|rust|java|aws|docker|kubernetes)\b",
        )
        .expect("skill pattern compiles")
    })
}

/// Known skill keywords mentioned in `text`, lowercased, in first-seen order.
pub fn skills_from_text(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in skill_pattern().find_iter(text) {
        let skill = m.as_str().to_ascii_lowercase();
        if !found.contains(&skill) {
            found.push(skill);
        }
    }
    found
}

impl HtmlBoard {
    fn absolute_link(&self, href: String) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href
        } else if href.starts_with('/') {
            format!("{}{href}", self.link_base)
        } else {
            format!("{}/{href}", self.link_base)
        }
    }
}

#[async_trait]
impl JobSource for HtmlBoard {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    fn display_name(&self) -> &'static str {
        self.display_name
    }

    fn default_rate(&self) -> TokenBucketConfig {
        TokenBucketConfig::per_minute(self.requests_per_minute)
    }

    fn page_url(&self, query: &str, page: u32) -> Result<Url, AdapterError> {
        let query = validate_query(query, page)?;
        let url = match self.pagination {
            Pagination::PageNumber {
                query_param,
                page_param,
            } => Url::parse_with_params(
                self.search_url,
                &[(query_param, query.to_string()), (page_param, page.to_string())],
            ),
            Pagination::Offset {
                query_param,
                offset_param,
                per_page,
            } => Url::parse_with_params(
                self.search_url,
                &[
                    (query_param, query.to_string()),
                    (offset_param, ((page - 1) * per_page).to_string()),
                ],
            ),
            Pagination::PathSlug => {
                let slug = query_slug(query);
                if slug.is_empty() {
                    return Err(AdapterError::Query(format!("`{query}` has no searchable words")));
                }
                Url::parse(&format!("{}/{slug}-jobs-{page}", self.search_url))
            }
        };
        url.map_err(|e| AdapterError::Query(e.to_string()))
    }

    fn parse_page(&self, html: &str) -> Result<Vec<JobPosting>, AdapterError> {
        let sel = &self.selectors;
        let card_sel = selector(sel.card)?;
        let title_sel = selector(sel.title)?;
        let company_sel = sel.company.map(selector).transpose()?;
        let location_sel = selector(sel.location)?;
        let link_sel = selector(sel.link)?;
        let skills_sel = sel.skills.map(selector).transpose()?;

        let document = Html::parse_document(html);
        let mut postings = Vec::new();
        for card in document.select(&card_sel) {
            let Some(title) = first_text(&card, &title_sel) else {
                continue;
            };
            let company = company_sel
                .as_ref()
                .and_then(|s| first_text(&card, s))
                .or_else(|| self.fixed_company.map(str::to_string))
                .unwrap_or_default();
            let skills = match &skills_sel {
                Some(s) => card
                    .select(s)
                    .filter_map(|n| text_or_none(n.text().collect::<String>()))
                    .collect(),
                None => skills_from_text(&card.text().collect::<Vec<_>>().join(" ")),
            };
            postings.push(JobPosting {
                source: self.display_name.to_string(),
                title,
                company,
                location: first_text(&card, &location_sel).unwrap_or_default(),
                url: first_attr(&card, &link_sel, "href").map(|href| self.absolute_link(href)),
                skills,
            });
        }
        Ok(postings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_urls_follow_each_boards_scheme() {
        assert_eq!(
            GITHUB_CAREERS.page_url("rust dev", 2).unwrap().as_str(),
            "https://www.github.careers/careers-home/jobs?keywords=rust+dev&page=2"
        );
        assert_eq!(
            LINKEDIN.page_url("rust", 3).unwrap().as_str(),
            "https://www.linkedin.com/jobs/search/?keywords=rust&start=50"
        );
        assert_eq!(
            INDEED.page_url("go&rust", 1).unwrap().as_str(),
            "https://www.indeed.com/jobs?q=go%26rust&start=0"
        );
        assert_eq!(
            NAUKRI.page_url("React JS Developer", 4).unwrap().as_str(),
            "https://www.naukri.com/react-js-developer-jobs-4"
        );
        assert!(NAUKRI.page_url("++", 1).is_err());
    }

    #[test]
    fn linkedin_cards_parse() {
        let html = r#"
            <ul>
              <li><div class="job-search-card">
                <a class="job-search-card__title" href="https://www.linkedin.com/jobs/view/1">
                  Backend Developer
                </a>
                <h4 class="job-search-card__subtitle">Acme</h4>
                <span class="job-search-card__location">Pune, India</span>
              </div></li>
              <li><div class="job-search-card"><span class="job-search-card__location">x</span></div></li>
            </ul>"#;
        let postings = LINKEDIN.parse_page(html).unwrap();
        assert_eq!(postings.len(), 1);
        let job = &postings[0];
        assert_eq!(job.source, "LinkedIn");
        assert_eq!(job.title, "Backend Developer");
        assert_eq!(job.company, "Acme");
        assert_eq!(job.location, "Pune, India");
        assert_eq!(job.url.as_deref(), Some("https://www.linkedin.com/jobs/view/1"));
    }

    #[test]
    fn indeed_links_are_made_absolute() {
        let html = r#"
            <div class="job_seen_beacon">
              <h2 class="jobTitle"><a class="jcs-JobTitle" href="/rc/clk?jk=42">Rust Engineer</a></h2>
              <span class="companyName">Globex</span>
              <div class="companyLocation">Remote</div>
              <div class="snippet">Rust, Docker and AWS experience</div>
            </div>"#;
        let job = INDEED.parse_page(html).unwrap().remove(0);
        assert_eq!(job.url.as_deref(), Some("https://www.indeed.com/rc/clk?jk=42"));
        assert_eq!(job.skills, vec!["rust", "docker", "aws"]);
    }

    #[test]
    fn naukri_skills_come_from_tags() {
        let html = r#"
            <article class="jobTuple">
              <a class="title" href="https://www.naukri.com/job-listings-1">Node Developer</a>
              <a class="companyInfo">Initech</a>
              <li class="location">Bengaluru</li>
              <ul class="tags"><li>Node.js</li><li>MongoDB</li></ul>
            </article>"#;
        let job = NAUKRI.parse_page(html).unwrap().remove(0);
        assert_eq!(job.skills, vec!["Node.js", "MongoDB"]);
        assert_eq!(job.company, "Initech");
    }

    #[test]
    fn github_cards_use_fixed_company() {
        let html = r#"
            <div class="job-result-card">
              <a class="job-title-link" href="/careers-home/jobs/3001"><span class="job-title">Senior Software Engineer</span></a>
              <span class="job-location">Remote - US</span>
              <p>Ruby, Go and TypeScript</p>
            </div>"#;
        let job = GITHUB_CAREERS.parse_page(html).unwrap().remove(0);
        assert_eq!(job.company, "GitHub");
        assert_eq!(
            job.url.as_deref(),
            Some("https://www.github.careers/careers-home/jobs/3001")
        );
        assert_eq!(job.skills, vec!["go", "typescript"]);
    }

    #[test]
    fn keyword_scan_respects_word_boundaries() {
        assert_eq!(skills_from_text("JavaScript and Java, not gopher"), vec!["javascript", "java"]);
        assert!(skills_from_text("nothing relevant").is_empty());
    }

    #[test]
    fn registry_lookup_knows_every_builtin() {
        for board in BUILTIN_SOURCES {
            let adapter = adapter_for_source(board.source_id).unwrap();
            assert_eq!(adapter.display_name(), board.display_name);
        }
        assert!(adapter_for_source("monster").is_none());
        assert_eq!(GITHUB_CAREERS.default_rate().capacity, 10);
        assert_eq!(INDEED.default_rate().capacity, 5);
    }
}
