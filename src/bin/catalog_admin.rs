#![forbid(unsafe_code)]

//! Minimal catalog administration CLI: adds or updates movies, series, and
//! episodes in the local catalog DB. This is the only writer the stream
//! server's data ever sees; the serving paths are read-only.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use streamgate::catalog::{CatalogStore, ContentKind, EpisodeRecord};
use streamgate::config::DEFAULT_CATALOG_DB;
use streamgate::security::ensure_not_root;

const USAGE: &str = "\
usage:
  catalog_admin add-movie   --id ID --title TITLE [--video REF] [--db PATH]
  catalog_admin add-series  --id ID --title TITLE [--db PATH]
  catalog_admin add-episode --id ID --series SERIES_ID --season N --episode N [--video REF] [--db PATH]

The stored reference may be an absolute URL, a /uploads/ path, or a CDN key.";

#[derive(Debug, Default)]
struct Flags {
    db: Option<PathBuf>,
    id: Option<String>,
    title: Option<String>,
    series: Option<String>,
    season: Option<i64>,
    episode: Option<i64>,
    video: Option<String>,
}

impl Flags {
    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let value = match inline {
                Some(value) => value,
                None => args
                    .next()
                    .ok_or_else(|| anyhow!("{flag} requires a value"))?,
            };
            match flag.as_str() {
                "--db" => flags.db = Some(PathBuf::from(value)),
                "--id" => flags.id = Some(value),
                "--title" => flags.title = Some(value),
                "--series" => flags.series = Some(value),
                "--season" => {
                    flags.season = Some(value.parse().context("--season expects an integer")?)
                }
                "--episode" => {
                    flags.episode = Some(value.parse().context("--episode expects an integer")?)
                }
                "--video" => flags.video = Some(value),
                other => bail!("unknown argument: {other}\n{USAGE}"),
            }
        }
        Ok(flags)
    }

    fn require(&self, value: &Option<String>, name: &str) -> Result<String> {
        value.clone().ok_or_else(|| anyhow!("{name} is required\n{USAGE}"))
    }
}

fn db_path(flags: &Flags) -> PathBuf {
    flags
        .db
        .clone()
        .or_else(|| std::env::var("STREAMGATE_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_DB))
}

#[tokio::main]
async fn main() -> Result<()> {
    ensure_not_root("catalog_admin")?;

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!("{USAGE}");
    };
    let flags = Flags::from_iter(args)?;
    let store = CatalogStore::open(&db_path(&flags)).await?;

    match command.as_str() {
        "add-movie" => {
            let id = flags.require(&flags.id, "--id")?;
            let title = flags.require(&flags.title, "--title")?;
            store
                .upsert_content(&id, &title, ContentKind::Movie, flags.video.as_deref())
                .await?;
            println!("stored movie {id}");
        }
        "add-series" => {
            let id = flags.require(&flags.id, "--id")?;
            let title = flags.require(&flags.title, "--title")?;
            store
                .upsert_content(&id, &title, ContentKind::Series, None)
                .await?;
            println!("stored series {id}");
        }
        "add-episode" => {
            let record = EpisodeRecord {
                id: flags.require(&flags.id, "--id")?,
                series_id: flags.require(&flags.series, "--series")?,
                season: flags.season.ok_or_else(|| anyhow!("--season is required\n{USAGE}"))?,
                episode: flags
                    .episode
                    .ok_or_else(|| anyhow!("--episode is required\n{USAGE}"))?,
                video_ref: flags.video.clone(),
            };
            store.upsert_episode(&record).await?;
            println!("stored episode {} of series {}", record.id, record.series_id);
        }
        other => bail!("unknown command: {other}\n{USAGE}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_both_forms() {
        let flags = Flags::from_iter(
            ["--id=e1", "--series", "s1", "--season=1", "--episode", "2"].map(str::to_owned),
        )
        .unwrap();
        assert_eq!(flags.id.as_deref(), Some("e1"));
        assert_eq!(flags.series.as_deref(), Some("s1"));
        assert_eq!(flags.season, Some(1));
        assert_eq!(flags.episode, Some(2));
    }

    #[test]
    fn flags_reject_unknown_and_missing_values() {
        assert!(Flags::from_iter(["--mystery".to_owned(), "x".to_owned()]).is_err());
        assert!(Flags::from_iter(["--id".to_owned()]).is_err());
        assert!(Flags::from_iter(["--season".to_owned(), "one".to_owned()]).is_err());
    }
}
