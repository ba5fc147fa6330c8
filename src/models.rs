//! Records persisted by the pipeline.
//!
//! Field names follow the published JSON contract (camelCase), so the serving
//! layer can read these files without knowing anything about this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of channels the pipeline follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "AllEars.net")]
    AllEars,
    #[serde(rename = "DFBGuide")]
    DfbGuide,
    #[serde(rename = "PixieDustedMom")]
    PixieDustedMom,
    #[serde(rename = "MillennialOnMainStreet")]
    MillennialOnMainStreet,
    #[serde(rename = "DisneyInDetail")]
    DisneyInDetail,
    #[serde(rename = "TheTimTracker")]
    TheTimTracker,
    #[serde(rename = "MickeyViews")]
    MickeyViews,
    #[serde(rename = "ResortTV1")]
    ResortTv1,
    #[serde(rename = "PagingMrMorrow")]
    PagingMrMorrow,
    #[serde(rename = "TPMvids")]
    TpmVids,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::AllEars,
        Channel::DfbGuide,
        Channel::PixieDustedMom,
        Channel::MillennialOnMainStreet,
        Channel::DisneyInDetail,
        Channel::TheTimTracker,
        Channel::MickeyViews,
        Channel::ResortTv1,
        Channel::PagingMrMorrow,
        Channel::TpmVids,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::AllEars => "AllEars.net",
            Channel::DfbGuide => "DFBGuide",
            Channel::PixieDustedMom => "PixieDustedMom",
            Channel::MillennialOnMainStreet => "MillennialOnMainStreet",
            Channel::DisneyInDetail => "DisneyInDetail",
            Channel::TheTimTracker => "TheTimTracker",
            Channel::MickeyViews => "MickeyViews",
            Channel::ResortTv1 => "ResortTV1",
            Channel::PagingMrMorrow => "PagingMrMorrow",
            Channel::TpmVids => "TPMvids",
        }
    }

    /// YouTube channel id used to build the syndication feed URL
    pub fn feed_id(&self) -> &'static str {
        match self {
            Channel::AllEars => "UCfzP_CiebRdveD9rRZv5Ndw",
            Channel::DfbGuide => "UCnpWedLQdHpZqhgTLdB9Yyg",
            Channel::PixieDustedMom => "UCnYjpNazZ0ixJCXxH7Z2B7g",
            Channel::MillennialOnMainStreet => "UCe8XA4Z14D0gCg_LO65QaYw",
            Channel::DisneyInDetail => "UCMy03Ou7q60HYfbzWvulQHQ",
            Channel::TheTimTracker => "UCoocMG5lMACNKgpvqKay2lg",
            Channel::MickeyViews => "UCRQvSjD0MT-EztE2iRqLQJA",
            Channel::ResortTv1 => "UCAjpFyA7FCRoGOuj5i4kq9g",
            Channel::PagingMrMorrow => "UCscn2aSpMrS2U_mf7OF-UwQ",
            Channel::TpmVids => "UCMddDi4iCT8Rz8L0JL-bH7Q",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A discovered video, enriched with its transcript once one is fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub channel_name: Channel,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl Video {
    pub fn has_transcript(&self) -> bool {
        self.transcript.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Contents of `videos.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideosData {
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    pub total_videos: usize,
    pub videos: Vec<Video>,
}

/// Generates a lenient string enum: serialization is the kebab-case name,
/// deserialization goes through `normalize` so retired or model-invented
/// values collapse onto a valid variant instead of failing the whole file.
macro_rules! lenient_enum {
    ($name:ident, default = $default:ident, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String")]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Exact match on the canonical name
            pub fn parse_exact(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name::normalize(&value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

lenient_enum!(Category, default = Parks, {
    Parks => "parks",
    Dining => "dining",
    Hotels => "hotels",
    Budget => "budget",
    Planning => "planning",
    Transportation => "transportation",
});

lenient_enum!(Park, default = AllParks, {
    MagicKingdom => "magic-kingdom",
    Epcot => "epcot",
    HollywoodStudios => "hollywood-studios",
    AnimalKingdom => "animal-kingdom",
    DisneySprings => "disney-springs",
    WaterParks => "water-parks",
    Disneyland => "disneyland",
    CaliforniaAdventure => "california-adventure",
    AllParks => "all-parks",
});

lenient_enum!(Priority, default = Medium, {
    High => "high",
    Medium => "medium",
    Low => "low",
});

lenient_enum!(Season, default = YearRound, {
    YearRound => "year-round",
    Christmas => "christmas",
    Halloween => "halloween",
    FlowerGarden => "flower-garden",
    FoodWine => "food-wine",
    FestivalArts => "festival-arts",
    Summer => "summer",
});

/// Lowercases and hyphenates free text so "Hollywood Studios" and
/// "hollywood_studios" compare equal to "hollywood-studios".
pub(crate) fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '+' || ch == '&' {
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
    }
    slug.trim_end_matches('-').to_string()
}

impl Category {
    /// Map any model-returned category onto the fixed set; unknown values land on `parks`
    pub fn normalize(value: &str) -> Self {
        let slug = slugify(value);
        if let Some(exact) = Self::parse_exact(&slug) {
            return exact;
        }
        match slug.as_str() {
            "food" | "restaurants" | "restaurant" | "snacks" | "drinks" | "dining-plan" => Category::Dining,
            "hotel" | "resort" | "resorts" | "lodging" | "accommodations" => Category::Hotels,
            "money" | "savings" | "deals" | "discounts" | "tickets" | "cost" => Category::Budget,
            "general" | "tips" | "itinerary" | "packing" | "strategy" | "crowds" => Category::Planning,
            "transport" | "buses" | "bus" | "skyliner" | "monorail" | "boats" | "parking" => {
                Category::Transportation
            }
            // genie, genie+, lightning-lane, rides, attractions and anything unmapped
            _ => Category::Parks,
        }
    }
}

impl Park {
    /// Map any model-returned park onto the fixed set; unknown values land on `all-parks`
    pub fn normalize(value: &str) -> Self {
        let slug = slugify(value);
        if let Some(exact) = Self::parse_exact(&slug) {
            return exact;
        }
        match slug.as_str() {
            "mk" | "magic-kingdom-park" => Park::MagicKingdom,
            "epcot-center" | "world-showcase" => Park::Epcot,
            "dhs" | "hs" | "mgm-studios" | "disneys-hollywood-studios" => Park::HollywoodStudios,
            "ak" | "dak" | "disneys-animal-kingdom" => Park::AnimalKingdom,
            "springs" | "downtown-disney" => Park::DisneySprings,
            "typhoon-lagoon" | "blizzard-beach" | "water-park" => Park::WaterParks,
            "disneyland-park" | "dl" => Park::Disneyland,
            "dca" | "disney-california-adventure" => Park::CaliforniaAdventure,
            _ => Park::AllParks,
        }
    }
}

impl Priority {
    pub fn normalize(value: &str) -> Self {
        Self::parse_exact(&slugify(value)).unwrap_or_default()
    }
}

impl Season {
    pub fn normalize(value: &str) -> Self {
        let slug = slugify(value);
        if let Some(exact) = Self::parse_exact(&slug) {
            return exact;
        }
        match slug.as_str() {
            "holiday" | "holidays" | "christmas-season" => Season::Christmas,
            "flower-&-garden" | "flower-and-garden" => Season::FlowerGarden,
            "food-&-wine" | "food-and-wine" => Season::FoodWine,
            "festival-of-the-arts" => Season::FestivalArts,
            _ => Season::YearRound,
        }
    }
}

/// Back-reference from a tip to the video it was extracted from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipSource {
    pub video_id: String,
    pub channel_name: Channel,
    pub video_title: String,
    pub published_at: DateTime<Utc>,
}

impl TipSource {
    pub fn from_video(video: &Video) -> Self {
        Self {
            video_id: video.id.clone(),
            channel_name: video.channel_name,
            video_title: video.title.clone(),
            published_at: video.published_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTip {
    pub id: String,
    pub text: String,
    pub category: Category,
    #[serde(default)]
    pub park: Park,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub season: Season,
    pub source: TipSource,
    pub extracted_at: DateTime<Utc>,
}

/// Identity used for exact duplicate detection across the corpus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TipKey {
    pub text: String,
    pub category: Category,
    pub park: Park,
    pub priority: Priority,
}

impl ExtractedTip {
    pub fn dedup_key(&self) -> TipKey {
        TipKey {
            text: normalize_tip_text(&self.text),
            category: self.category,
            park: self.park,
            priority: self.priority,
        }
    }
}

/// Lowercase, trimmed, internal whitespace collapsed
pub fn normalize_tip_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Contents of the published `tips.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipsData {
    pub last_updated: DateTime<Utc>,
    pub total_tips: usize,
    pub tips: Vec<ExtractedTip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_tips: Option<Vec<String>>,
}

/// One entry per video extraction has ever been attempted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedVideoRecord {
    pub video_id: String,
    pub processed_at: DateTime<Utc>,
    pub tip_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingEntry {
    pub tip_id: String,
    pub vector: Vec<f32>,
}

/// Newest publish date first; the canonical display order
pub fn sort_newest_first(tips: &mut [ExtractedTip]) {
    tips.sort_by(|a, b| b.source.published_at.cmp(&a.source.published_at));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_normalization() {
        assert_eq!(Category::normalize("dining"), Category::Dining);
        assert_eq!(Category::normalize("genie+"), Category::Parks);
        assert_eq!(Category::normalize("lightning-lane"), Category::Parks);
        assert_eq!(Category::normalize("Restaurants"), Category::Dining);
        assert_eq!(Category::normalize("general"), Category::Planning);
        assert_eq!(Category::normalize("something odd"), Category::Parks);
    }

    #[test]
    fn test_park_normalization() {
        assert_eq!(Park::normalize("Hollywood Studios"), Park::HollywoodStudios);
        assert_eq!(Park::normalize("magic_kingdom"), Park::MagicKingdom);
        assert_eq!(Park::normalize("DCA"), Park::CaliforniaAdventure);
        assert_eq!(Park::normalize("general"), Park::AllParks);
        assert_eq!(Park::normalize(""), Park::AllParks);
    }

    #[test]
    fn test_lenient_deserialization() {
        let category: Category = serde_json::from_str("\"genie\"").unwrap();
        assert_eq!(category, Category::Parks);

        let season: Season = serde_json::from_str("\"food & wine\"").unwrap();
        assert_eq!(season, Season::FoodWine);

        assert_eq!(serde_json::to_string(&Park::AllParks).unwrap(), "\"all-parks\"");
    }

    #[test]
    fn test_channel_names_round_trip_through_json() {
        for channel in Channel::ALL {
            let json = serde_json::to_string(&channel).unwrap();
            assert_eq!(json, format!("\"{}\"", channel.name()));
        }
    }

    #[test]
    fn test_legacy_tip_defaults() {
        let json = r#"{
            "id": "t1",
            "text": "Ride Slinky Dog Dash first",
            "category": "lightning-lane",
            "tags": ["rope-drop"],
            "source": {
                "videoId": "abc",
                "channelName": "DFBGuide",
                "videoTitle": "Tips",
                "publishedAt": "2024-05-01T12:00:00.000Z"
            },
            "extractedAt": "2024-05-02T12:00:00.000Z"
        }"#;
        let tip: ExtractedTip = serde_json::from_str(json).unwrap();
        assert_eq!(tip.category, Category::Parks);
        assert_eq!(tip.park, Park::AllParks);
        assert_eq!(tip.priority, Priority::Medium);
        assert_eq!(tip.season, Season::YearRound);
    }

    #[test]
    fn test_dedup_key_ignores_case_and_spacing() {
        assert_eq!(normalize_tip_text("  Use   Early Entry\n"), "use early entry");
    }
}
