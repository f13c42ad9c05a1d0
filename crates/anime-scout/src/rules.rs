//! The catalogue rule book: one extraction rule per page kind.

use std::sync::Arc;

use url::Url;

use crate::extract::{ExtractionRule, FieldSpec, FieldValues, Record};
use crate::types::{DetailRecord, EpisodeEntry, ListingRecord, ScoutResult};

impl Record for ListingRecord {
    fn from_fields(mut fields: FieldValues) -> Self {
        Self {
            content_id: fields.take("content_id"),
            title: fields.take("title"),
            image_url: fields.take("image_url"),
            episode_label: fields.take_non_empty("episode_label"),
            status: fields.take("status"),
            content_type: fields.take("content_type"),
            subtitle_flag: fields.take("subtitle_flag"),
            release_label: fields.take_non_empty("release_label"),
        }
    }
}

impl Record for DetailRecord {
    fn from_fields(mut fields: FieldValues) -> Self {
        Self {
            // Filled in from the requested identifier.
            id: String::new(),
            title: fields.take("title"),
            description_html: fields.take("description_html"),
            image_url: fields.take("image_url"),
            status: fields.take("status"),
            studio: fields.take("studio"),
            release_date: fields.take("release_date"),
            duration: fields.take("duration"),
            season: fields.take("season"),
            content_type: fields.take("content_type"),
            episode_count: fields.take("episode_count"),
            genres: fields.take("genres"),
        }
    }
}

impl Record for EpisodeEntry {
    fn from_fields(mut fields: FieldValues) -> Self {
        Self {
            number: fields.take("number"),
            episode_id: fields.take("episode_id"),
        }
    }
}

/// Compiled rules for every page kind the catalogue serves.
#[derive(Debug)]
pub struct RuleBook {
    pub latest: Arc<ExtractionRule<ListingRecord>>,
    pub search: Arc<ExtractionRule<ListingRecord>>,
    pub detail: Arc<ExtractionRule<DetailRecord>>,
    pub episodes: Arc<ExtractionRule<EpisodeEntry>>,
}

impl RuleBook {
    /// Build the rule book for a site rooted at `base`.
    ///
    /// Link fields are stored as identifiers relative to `base`, so the
    /// base URL is baked into their transforms.
    pub fn catalogue(base: &Url) -> ScoutResult<Self> {
        let base = base.as_str();

        let mut latest_fields = card_fields(
            FieldSpec::attr("content_id", ".tip", "href")
                .strip_prefix(base)
                .trim_char('/'),
        );
        latest_fields.push(FieldSpec::text("episode_label", ".epx"));
        latest_fields.push(FieldSpec::text("release_label", ".timeago"));

        Ok(Self {
            latest: Arc::new(ExtractionRule::new(
                "latest listing",
                ".listupd.normal",
                Some("article.bs"),
                latest_fields,
            )?),
            search: Arc::new(ExtractionRule::new(
                "search listing",
                ".listupd",
                Some("article.bs"),
                card_fields(
                    FieldSpec::attr("content_id", ".tip", "href")
                        .strip_prefix(base)
                        .trim_char('/')
                        .strip_prefix("series/")
                        .trim_char('/'),
                ),
            )?),
            detail: Arc::new(ExtractionRule::new(
                "detail",
                ".bigcontent.nobigcv",
                None,
                vec![
                    FieldSpec::text("title", ".entry-title"),
                    FieldSpec::inner_html("description_html", ".ninfo p"),
                    FieldSpec::attr("image_url", ".thumb img", "src"),
                    FieldSpec::text("status", ".info-content span:nth-of-type(1)").strip_prefix("Status:"),
                    FieldSpec::text("studio", ".info-content span:nth-of-type(2) a"),
                    FieldSpec::text("release_date", ".info-content span:nth-of-type(3)").strip_prefix("Released:"),
                    FieldSpec::text("duration", ".info-content span:nth-of-type(4)").strip_prefix("Duration:"),
                    FieldSpec::text("season", ".info-content span:nth-of-type(5)").strip_prefix("Season:"),
                    FieldSpec::text("content_type", ".info-content span:nth-of-type(6)").strip_prefix("Type:"),
                    FieldSpec::text("episode_count", ".info-content span:nth-of-type(7)").strip_prefix("Episodes:"),
                    FieldSpec::joined("genres", ".genxed a", ", "),
                ],
            )?),
            episodes: Arc::new(ExtractionRule::new(
                "episodes",
                ".episodes-container",
                Some(".episode-item a"),
                vec![
                    FieldSpec::own_text("number").strip_prefix("Episode "),
                    FieldSpec::own_attr("episode_id", "href").strip_prefix(base).trim_char('/'),
                ],
            )?),
        })
    }
}

/// Fields shared by both listing rules.
fn card_fields(content_id: FieldSpec) -> Vec<FieldSpec> {
    vec![
        content_id,
        FieldSpec::leading_text("title", ".tt"),
        FieldSpec::attr("image_url", ".bsx img", "src"),
        FieldSpec::text("status", ".status").or_default("Ongoing"),
        FieldSpec::text("content_type", ".typez"),
        FieldSpec::text("subtitle_flag", ".sb"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> RuleBook {
        RuleBook::catalogue(&Url::parse("https://gogoanime.by/").unwrap()).unwrap()
    }

    const LATEST: &str = r#"
      <div class="listupd normal">
        <article class="bs"><div class="bsx">
          <a class="tip" href="https://gogoanime.by/one-piece-episode-1100/">
            <img src="https://img.test/op.jpg">
            <span class="epx"> Ep 1100 </span><span class="sb">Sub</span>
            <span class="typez">TV</span><span class="timeago">2 hours ago</span>
            <div class="tt">  One   Piece
              <h2>One Piece Episode 1100</h2></div>
          </a></div>
        </article>
        <article class="bs"><div class="bsx">
          <a class="tip" href="https://gogoanime.by/mushishi-episode-3/">
            <img src="https://img.test/mu.jpg">
            <span class="status">Completed</span>
            <div class="tt">Mushishi</div>
          </a></div>
        </article>
      </div>"#;

    #[test]
    fn test_latest_listing_fields() {
        let records = book().latest.extract_all(LATEST);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.content_id, "one-piece-episode-1100");
        assert_eq!(first.title, "One Piece");
        assert_eq!(first.image_url, "https://img.test/op.jpg");
        assert_eq!(first.episode_label.as_deref(), Some("Ep 1100"));
        assert_eq!(first.release_label.as_deref(), Some("2 hours ago"));
        assert_eq!(first.status, "Ongoing");
        assert_eq!(first.content_type, "TV");
        assert_eq!(first.subtitle_flag, "Sub");

        let second = &records[1];
        assert_eq!(second.status, "Completed");
        assert_eq!(second.episode_label, None);
        assert_eq!(second.subtitle_flag, "");
    }

    #[test]
    fn test_search_strips_series_prefix() {
        let html = r#"<div class="listupd">
            <article class="bs"><a class="tip" href="https://gogoanime.by/series/naruto/"><div class="tt">Naruto</div></a></article>
            <article class="bs"><a class="tip" href="/series/bleach/"><div class="tt">Bleach</div></a></article>
          </div>"#;
        let records = book().search.extract_all(html);
        let ids: Vec<&str> = records.iter().map(|r| r.content_id.as_str()).collect();
        assert_eq!(ids, vec!["naruto", "bleach"]);
        assert!(records.iter().all(|r| r.release_label.is_none()));
    }

    #[test]
    fn test_detail_fields() {
        let html = r#"<div class="bigcontent nobigcv">
            <div class="thumb"><img src="https://img.test/frieren.jpg"></div>
            <h1 class="entry-title"> Frieren </h1>
            <div class="ninfo"><p>An elf <i>mage</i>.</p></div>
            <div class="info-content">
              <span>Status: Completed</span>
              <span>Studio: <a>Madhouse</a></span>
              <span>Released: 2023</span>
              <span>Duration: 24 min.</span>
              <span>Season: Fall 2023</span>
              <span>Type: TV</span>
              <span>Episodes: 28</span>
            </div>
            <div class="genxed"><a>Adventure</a><a>Drama</a><a>Fantasy</a></div>
          </div>"#;
        let detail = book().detail.extract_one(html).unwrap();
        assert_eq!(detail.title, "Frieren");
        assert_eq!(detail.description_html, "An elf <i>mage</i>.");
        assert_eq!(detail.image_url, "https://img.test/frieren.jpg");
        assert_eq!(detail.status, "Completed");
        assert_eq!(detail.studio, "Madhouse");
        assert_eq!(detail.release_date, "2023");
        assert_eq!(detail.duration, "24 min.");
        assert_eq!(detail.season, "Fall 2023");
        assert_eq!(detail.content_type, "TV");
        assert_eq!(detail.episode_count, "28");
        assert_eq!(detail.genres, "Adventure, Drama, Fantasy");
    }

    #[test]
    fn test_detail_missing_root() {
        assert!(book().detail.extract_one("<div class='bigcontent'></div>").is_none());
    }

    #[test]
    fn test_episode_entries() {
        let html = r#"<div class="episodes-container">
            <div class="episode-item"><a href="https://gogoanime.by/frieren-episode-1/">Episode 1</a></div>
            <div class="episode-item"><a href="https://gogoanime.by/frieren-episode-2/">Episode 2</a></div>
          </div>"#;
        let episodes = book().episodes.extract_all(html);
        assert_eq!(
            episodes,
            vec![
                EpisodeEntry { number: "1".into(), episode_id: "frieren-episode-1".into() },
                EpisodeEntry { number: "2".into(), episode_id: "frieren-episode-2".into() },
            ]
        );
    }
}
