use serde::{Deserialize, Deserializer, Serialize};

/// User data interpolated into a generated portfolio.
///
/// Request-scoped: built from direct input or a parsed resume, consumed once
/// by the synthesizer, never persisted. Every field is optional on input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortfolioTemplateData {
    #[serde(deserialize_with = "null_as_default")]
    pub personal: PersonalInfo,
    #[serde(deserialize_with = "strings_without_nulls")]
    pub skills: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub projects: Vec<Project>,
    #[serde(deserialize_with = "null_as_default")]
    pub experience: Vec<Experience>,
    #[serde(deserialize_with = "null_as_default")]
    pub education: Vec<Education>,
    #[serde(deserialize_with = "null_as_default")]
    pub social: SocialLinks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub bio: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(deserialize_with = "null_as_default")]
    pub website: String,
    #[serde(deserialize_with = "null_as_default")]
    pub profile_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "strings_without_nulls")]
    pub technologies: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub github_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub live_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Experience {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(deserialize_with = "null_as_default")]
    pub duration: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Education {
    #[serde(deserialize_with = "null_as_default")]
    pub degree: String,
    #[serde(deserialize_with = "null_as_default")]
    pub institution: String,
    #[serde(deserialize_with = "null_as_default")]
    pub year: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialLinks {
    #[serde(deserialize_with = "null_as_default")]
    pub github: String,
    #[serde(deserialize_with = "null_as_default")]
    pub linkedin: String,
    #[serde(deserialize_with = "null_as_default")]
    pub twitter: String,
}

/// Treats an explicit JSON `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// String lists tolerate `null` for the list and for individual items.
fn strings_without_nulls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Option<String>>>::deserialize(deserializer)?;
    Ok(items.into_iter().flatten().flatten().collect())
}

impl PortfolioTemplateData {
    /// Trims every string, drops empty list items and duplicate skills.
    pub fn normalized(mut self) -> Self {
        let p = &mut self.personal;
        for field in [
            &mut p.name,
            &mut p.title,
            &mut p.bio,
            &mut p.email,
            &mut p.phone,
            &mut p.location,
            &mut p.website,
            &mut p.profile_image,
            &mut self.social.github,
            &mut self.social.linkedin,
            &mut self.social.twitter,
        ] {
            trim_in_place(field);
        }

        let mut seen = std::collections::HashSet::new();
        self.skills = self
            .skills
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .collect();

        for project in &mut self.projects {
            for field in [
                &mut project.title,
                &mut project.description,
                &mut project.github_url,
                &mut project.live_url,
                &mut project.image_url,
            ] {
                trim_in_place(field);
            }
            project.technologies.retain(|t| !t.trim().is_empty());
        }
        self.projects.retain(|p| !p.title.is_empty());

        for job in &mut self.experience {
            for field in [
                &mut job.title,
                &mut job.company,
                &mut job.duration,
                &mut job.description,
            ] {
                trim_in_place(field);
            }
        }
        self.experience
            .retain(|e| !e.title.is_empty() || !e.company.is_empty());

        for school in &mut self.education {
            for field in [&mut school.degree, &mut school.institution, &mut school.year] {
                trim_in_place(field);
            }
        }
        self.education
            .retain(|e| !e.degree.is_empty() || !e.institution.is_empty());

        self
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}
