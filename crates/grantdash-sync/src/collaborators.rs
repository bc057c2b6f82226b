//! Curated collaborator directory and the expertise gap lookup.

use grantdash_core::{matches_keyword, CollaboratorProfile, CollaboratorStatus};

#[derive(Debug, Clone, Default)]
pub struct CollaboratorDirectory {
    profiles: Vec<CollaboratorProfile>,
}

impl CollaboratorDirectory {
    pub fn new(profiles: Vec<CollaboratorProfile>) -> Self {
        Self { profiles }
    }

    pub fn all(&self) -> &[CollaboratorProfile] {
        &self.profiles
    }

    pub fn current(&self) -> Vec<&CollaboratorProfile> {
        self.with_status(CollaboratorStatus::Current)
    }

    pub fn potential(&self) -> Vec<&CollaboratorProfile> {
        self.with_status(CollaboratorStatus::Potential)
    }

    fn with_status(&self, status: CollaboratorStatus) -> Vec<&CollaboratorProfile> {
        self.profiles.iter().filter(|p| p.status == status).collect()
    }

    /// Collaborators whose listed expertise covers `keyword`.
    pub fn experts_for(&self, keyword: &str) -> Vec<&CollaboratorProfile> {
        self.profiles
            .iter()
            .filter(|p| matches_keyword(&p.expertise, keyword))
            .collect()
    }

    /// Keywords nobody in the directory covers, in input order, each once.
    pub fn expertise_gaps<S: AsRef<str>>(&self, keywords: &[S]) -> Vec<String> {
        let mut gaps: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref().trim();
            if keyword.is_empty() || gaps.iter().any(|g| g.eq_ignore_ascii_case(keyword)) {
                continue;
            }
            if self.experts_for(keyword).is_empty() {
                gaps.push(keyword.to_string());
            }
        }
        gaps
    }
}
