//! Session batch planning.
//!
//! Turns the asset list for a new game session into job descriptors ordered by
//! what the player sees first. Each group gets its own priority band; within a
//! band the queue serves jobs in the order they appear here.

use crate::job::JobDescriptor;
use crate::types::Category;
use serde::{Deserialize, Serialize};

pub const TITLE_PRIORITY: i32 = 0;
pub const CALM_PORTRAIT_PRIORITY: i32 = 10;
pub const ROOM_PRIORITY: i32 = 20;
pub const EVIDENCE_PRIORITY: i32 = 30;
pub const MOOD_PRIORITY: i32 = 40;
pub const INTRO_VIDEO_PRIORITY: i32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtRequest {
    pub subject_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodVariant {
    pub mood: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterPlan {
    pub subject_id: String,
    pub calm_prompt: String,
    #[serde(default)]
    pub moods: Vec<MoodVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRequest {
    pub subject_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_asset: Option<String>,
}

/// Everything a session needs generated up front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionAssetPlan {
    /// Title screen and board art
    pub title_art: Vec<ArtRequest>,
    pub characters: Vec<CharacterPlan>,
    pub rooms: Vec<ArtRequest>,
    pub evidence: Vec<ArtRequest>,
    pub intro_videos: Vec<VideoRequest>,
}

impl SessionAssetPlan {
    pub fn len(&self) -> usize {
        self.title_art.len()
            + self
                .characters
                .iter()
                .map(|c| 1 + c.moods.len())
                .sum::<usize>()
            + self.rooms.len()
            + self.evidence.len()
            + self.intro_videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptors in serving order.
    pub fn into_descriptors(self) -> Vec<JobDescriptor> {
        let mut out = Vec::with_capacity(self.len());

        for art in self.title_art {
            out.push(JobDescriptor::new(
                art.subject_id,
                Category::UiImage,
                art.prompt,
                TITLE_PRIORITY,
            ));
        }
        for character in &self.characters {
            out.push(JobDescriptor::new(
                character.subject_id.clone(),
                Category::Portrait,
                character.calm_prompt.clone(),
                CALM_PORTRAIT_PRIORITY,
            ));
        }
        for room in self.rooms {
            out.push(JobDescriptor::new(
                room.subject_id,
                Category::Scene,
                room.prompt,
                ROOM_PRIORITY,
            ));
        }
        for item in self.evidence {
            out.push(JobDescriptor::new(
                item.subject_id,
                Category::EvidenceImage,
                item.prompt,
                EVIDENCE_PRIORITY,
            ));
        }
        for character in self.characters {
            for variant in character.moods {
                out.push(JobDescriptor::new(
                    character.subject_id.clone(),
                    Category::Portrait,
                    variant.prompt,
                    MOOD_PRIORITY,
                ));
            }
        }
        for video in self.intro_videos {
            let descriptor = JobDescriptor::new(
                video.subject_id,
                Category::Video,
                video.prompt,
                INTRO_VIDEO_PRIORITY,
            );
            out.push(match video.source_asset {
                Some(source) => descriptor.with_source_asset(source),
                None => descriptor,
            });
        }
        out
    }
}
