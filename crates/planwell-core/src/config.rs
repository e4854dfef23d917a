use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::recurrence::DEFAULT_OCCURRENCE_LIMIT;
use crate::window::ViewType;

pub const CONFIG_ENV: &str =
  "PLANWELL_CONFIG";
pub const TIMEZONE_ENV: &str =
  "PLANWELL_TIMEZONE";

fn calendar_true() -> bool {
  true
}

fn calendar_default_view() -> String {
  ViewType::default()
    .as_str()
    .to_string()
}

fn calendar_default_occurrence_limit()
-> usize {
  DEFAULT_OCCURRENCE_LIMIT
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct CalendarSection {
  #[serde(
    default = "calendar_default_view"
  )]
  pub default_view:     String,
  #[serde(
    default = "calendar_default_occurrence_limit"
  )]
  pub occurrence_limit: usize,
  #[serde(default = "calendar_true")]
  pub color:            bool
}

impl Default for CalendarSection {
  fn default() -> Self {
    Self {
      default_view:
        calendar_default_view(),
      occurrence_limit:
        calendar_default_occurrence_limit(
        ),
      color: true
    }
  }
}

#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Config {
  #[serde(default)]
  pub timezone:    Option<String>,
  #[serde(default)]
  pub user_id:     Option<String>,
  #[serde(default)]
  pub calendar:    CalendarSection,
  #[serde(skip)]
  pub loaded_from: Option<PathBuf>
}

impl Config {
  /// Reads the configuration file, falling back to defaults when no
  /// file exists at the default location.
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let Some((path, required)) =
      resolve_config_path(
        config_override
      )
    else {
      debug!(
        "no config location; using \
         defaults"
      );
      return Ok(Self::default());
    };

    if !path.exists() {
      if required {
        return Err(anyhow!(
          "config file {} does not \
           exist",
          path.display()
        ));
      }
      debug!(config = %path.display(), "no config file; using defaults");
      return Ok(Self::default());
    }

    info!(config = %path.display(), "loading config");
    let text = fs::read_to_string(
      &path
    )
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
    let mut cfg =
      Self::from_toml_str(&text)
        .with_context(|| {
          format!(
            "failed to parse {}",
            path.display()
          )
        })?;
    cfg.loaded_from = Some(path);
    Ok(cfg)
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg: Config =
      toml::from_str(text)?;
    cfg.sanitize();
    Ok(cfg)
  }

  /// `--rc key=value` pairs, applied after the file.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      match key.as_str() {
        | "timezone" => {
          self.timezone = Some(v);
        }
        | "user_id" => {
          self.user_id = Some(v);
        }
        | "calendar.default_view" => {
          self.calendar.default_view = v;
        }
        | "calendar.occurrence_limit" => {
          match v.trim().parse::<usize>()
          {
            | Ok(limit) => {
              self
                .calendar
                .occurrence_limit =
                limit;
            }
            | Err(error) => {
              warn!(value = %v, %error, "ignoring invalid occurrence limit");
            }
          }
        }
        | "calendar.color" => {
          self.calendar.color =
            parse_bool(&v);
        }
        | other => {
          warn!(key = %other, "unknown config override; ignoring");
        }
      }
    }
    self.sanitize();
  }

  fn sanitize(&mut self) {
    if self
      .timezone
      .as_deref()
      .is_some_and(|tz| {
        tz.trim().is_empty()
      })
    {
      self.timezone = None;
    }

    if self
      .user_id
      .as_deref()
      .is_some_and(|id| {
        id.trim().is_empty()
      })
    {
      self.user_id = None;
    }

    if self
      .calendar
      .default_view
      .parse::<ViewType>()
      .is_err()
    {
      warn!(
        view = %self.calendar.default_view,
        "invalid default view; using week"
      );
      self.calendar.default_view =
        calendar_default_view();
    }

    if self.calendar.occurrence_limit
      == 0
    {
      self.calendar.occurrence_limit =
        calendar_default_occurrence_limit(
        );
    }
  }

  pub fn default_view(
    &self
  ) -> ViewType {
    self
      .calendar
      .default_view
      .parse()
      .unwrap_or_default()
  }

  pub fn user_id(&self) -> &str {
    self
      .user_id
      .as_deref()
      .unwrap_or_default()
  }

  /// `PLANWELL_TIMEZONE`, then the file, then UTC.
  pub fn resolve_timezone(&self) -> Tz {
    self.resolve_timezone_with(
      std::env::var(TIMEZONE_ENV).ok()
    )
  }

  pub fn resolve_timezone_with(
    &self,
    env_value: Option<String>
  ) -> Tz {
    if let Some(raw) = env_value
      && let Some(tz) =
        parse_timezone(
          &raw,
          TIMEZONE_ENV
        )
    {
      return tz;
    }

    if let Some(raw) =
      self.timezone.as_deref()
      && let Some(tz) =
        parse_timezone(raw, "config")
    {
      return tz;
    }

    chrono_tz::UTC
  }
}

/// The config path to read and whether it was asked for explicitly.
fn resolve_config_path(
  override_path: Option<&Path>
) -> Option<(PathBuf, bool)> {
  if let Some(path) = override_path {
    return Some((
      path.to_path_buf(),
      true
    ));
  }

  if let Ok(env_path) =
    std::env::var(CONFIG_ENV)
    && !env_path.trim().is_empty()
  {
    return Some((
      PathBuf::from(env_path),
      true
    ));
  }

  dirs::config_dir().map(|dir| {
    (
      dir
        .join("planwell")
        .join("config.toml"),
      false
    )
  })
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => Some(tz),
    | Err(error) => {
      warn!(
        source,
        timezone = %trimmed,
        error = %error,
        "invalid timezone id"
      );
      None
    }
  }
}

#[must_use]
pub fn today_in(tz: Tz) -> NaiveDate {
  Utc::now()
    .with_timezone(&tz)
    .date_naive()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
