//! Message bodies and subjects. Sender details come from config, everything
//! else from the record and the title's skill profile.

use askama::Template;
use reachout_core::{
    profile_for_title, FirstContactStyle, OutreachError, OutreachRecord, TemplateChoice,
};
use serde::Serialize;

use crate::config::SenderProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Template)]
#[template(path = "first_contact_eager.txt")]
struct EagerTemplate<'a> {
    recipient_name: &'a str,
    job_title: &'a str,
    company_name: &'a str,
    years_of_experience: &'a str,
    industry: &'a str,
    skills: &'a str,
    signature: &'a str,
}

#[derive(Template)]
#[template(path = "first_contact_formal.txt")]
struct FormalTemplate<'a> {
    recipient_name: &'a str,
    job_title: &'a str,
    company_name: &'a str,
    years_of_experience: &'a str,
    industry: &'a str,
    skills: &'a str,
    signature: &'a str,
}

#[derive(Template)]
#[template(path = "referral_request.txt")]
struct ReferralTemplate<'a> {
    recipient_name: &'a str,
    sender_name: &'a str,
    headline: &'a str,
    found_via: &'a str,
    company_name: &'a str,
    highlights: &'a [String],
    signature: &'a str,
}

pub fn application_subject(job_title: &str, company_name: &str) -> String {
    format!("Application for {job_title} Position in {company_name}")
}

pub fn referral_subject(company_name: &str) -> String {
    format!("Seeking Your Advice: Software Developer Opportunities at {company_name}")
}

pub fn subject_for(choice: TemplateChoice, record: &OutreachRecord) -> String {
    match choice {
        TemplateChoice::FirstContact(_) => {
            application_subject(&record.job_title, &record.company_name)
        }
        TemplateChoice::ReferralRequest => referral_subject(&record.company_name),
    }
}

/// Renders subject and body for one record. The skill profile is looked up
/// from this record's title alone.
pub fn render(
    choice: TemplateChoice,
    record: &OutreachRecord,
    sender: &SenderProfile,
) -> Result<RenderedMessage, OutreachError> {
    let profile = profile_for_title(&record.job_title);
    let signature = signature(sender, matches!(choice, TemplateChoice::ReferralRequest));
    let body = match choice {
        TemplateChoice::FirstContact(FirstContactStyle::Eager) => EagerTemplate {
            recipient_name: &record.recipient_name,
            job_title: &record.job_title,
            company_name: &record.company_name,
            years_of_experience: &sender.years_of_experience,
            industry: profile.industry,
            skills: profile.skills,
            signature: &signature,
        }
        .render(),
        TemplateChoice::FirstContact(FirstContactStyle::Formal) => FormalTemplate {
            recipient_name: &record.recipient_name,
            job_title: &record.job_title,
            company_name: &record.company_name,
            years_of_experience: &sender.years_of_experience,
            industry: profile.industry,
            skills: profile.skills,
            signature: &signature,
        }
        .render(),
        TemplateChoice::ReferralRequest => ReferralTemplate {
            recipient_name: &record.recipient_name,
            sender_name: &sender.name,
            headline: &sender.headline,
            found_via: record
                .referral_target_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or("LinkedIn"),
            company_name: &record.company_name,
            highlights: &sender.highlights,
            signature: &signature,
        }
        .render(),
    }
    .map_err(|err| OutreachError::Validation(format!("rendering template: {err}")))?;

    Ok(RenderedMessage {
        subject: subject_for(choice, record),
        body: body.trim_end().to_string(),
    })
}

fn signature(sender: &SenderProfile, with_phone: bool) -> String {
    let mut lines = vec![sender.name.clone(), sender.headline.clone()];
    if with_phone {
        if let Some(phone) = &sender.phone {
            lines.push(phone.clone());
        }
    }
    lines.push(sender.linkedin_url.clone());
    if let Some(linktree) = &sender.linktree_url {
        lines.push(String::new());
        lines.push("Visit my LinkTree".to_string());
        lines.push(linktree.clone());
    }
    lines.join("\n")
}
