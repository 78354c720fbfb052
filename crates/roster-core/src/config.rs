use std::collections::{
  BTreeSet,
  HashMap
};
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::calendar::{
  CalendarSystem,
  RangeNormalizer,
  parse_timezone
};

const CONFIG_ENV_VAR: &str = "ROSTERRC";
const CONFIG_FILE_NAME: &str =
  ".rosterrc";
const RESOURCE_PREFIX: &str =
  "resource.";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      (
        "api.base_url",
        "http://localhost:3000/"
      ),
      ("api.timeout_secs", "30"),
      ("calendar", "gregorian"),
      ("timezone", "UTC"),
      ("search.debounce_ms", "600"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_config_path(
      config_override
    )?;
    if let Some(path) = rc {
      info!(config = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  /// Parses rc text directly. Relative
  /// `include` paths resolve against
  /// the working directory.
  pub fn from_str_lines(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();
    cfg.load_text(
      text,
      Path::new("<inline>"),
      Path::new(".")
    )?;
    Ok(cfg)
  }

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
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// `None` when unset; values other
  /// than on/off spellings are errors.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    parse_bool(raw)
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "invalid {key} setting: {raw}"
        )
      })
  }

  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|e| {
        anyhow!(
          "invalid value for {key}: \
           {raw:?} ({e})"
        )
      })
  }

  /// Keys under `prefix`, with the
  /// prefix stripped.
  pub fn section<'a>(
    &'a self,
    prefix: &'a str
  ) -> impl Iterator<Item = (&'a str, &'a str)>
  {
    self.map.iter().filter_map(
      move |(k, v)| {
        k.strip_prefix(prefix)
          .map(|rest| (rest, v.as_str()))
      }
    )
  }

  pub fn api_base_url(&self) -> String {
    self
      .get("api.base_url")
      .unwrap_or_else(|| {
        "http://localhost:3000/"
          .to_string()
      })
  }

  pub fn api_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    let secs = self
      .get_parsed::<u64>(
        "api.timeout_secs"
      )?
      .unwrap_or(30);
    Ok(Duration::from_secs(secs))
  }

  pub fn search_debounce(
    &self
  ) -> anyhow::Result<Duration> {
    let millis = self
      .get_parsed::<u64>(
        "search.debounce_ms"
      )?
      .unwrap_or(600);
    Ok(Duration::from_millis(millis))
  }

  pub fn calendar(
    &self
  ) -> anyhow::Result<CalendarSystem> {
    Ok(
      self
        .get_parsed::<CalendarSystem>(
          "calendar"
        )?
        .unwrap_or_default()
    )
  }

  pub fn range_normalizer(
    &self
  ) -> anyhow::Result<RangeNormalizer> {
    let raw = self
      .get("timezone")
      .unwrap_or_else(|| {
        "UTC".to_string()
      });
    let tz = parse_timezone(
      &raw, "timezone"
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid timezone setting: \
         {raw}"
      )
    })?;
    Ok(RangeNormalizer::new(tz))
  }

  /// Names of all `resource.<name>.*`
  /// sections, sorted.
  pub fn resource_names(
    &self
  ) -> Vec<String> {
    self
      .section(RESOURCE_PREFIX)
      .filter_map(|(rest, _)| {
        rest
          .split_once('.')
          .map(|(name, _)| {
            name.to_string()
          })
      })
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    self.load_text(
      &text, &path, &base_dir
    )
  }

  fn load_text(
    &mut self,
    text: &str,
    path: &Path,
    base_dir: &Path
  ) -> anyhow::Result<()> {
    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(CONFIG_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory"
    );
    return Ok(None);
  };
  let candidate =
    home.join(CONFIG_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use tempfile::tempdir;

  use super::Config;
  use crate::calendar::CalendarSystem;

  #[test]
  fn loads_file_with_include_and_overrides()
  {
    let dir = tempdir().expect("tempdir");
    let main = dir.path().join("rosterrc");
    let extra =
      dir.path().join("resources.rc");

    fs::write(
      &main,
      "# admin console\n\
       api.base_url = https://admin.example.com/api/\n\
       calendar = jalali # solar hijri\n\
       include resources.rc\n"
    )
    .expect("write main");
    fs::write(
      &extra,
      "resource.blog.id_field = _id\n\
       resource.ticket.path = support/ticket\n"
    )
    .expect("write include");

    let mut cfg = Config::load(Some(main.as_path()))
      .expect("load config");
    cfg.apply_overrides(vec![(
      "rc.search.debounce_ms".to_string(),
      "250".to_string()
    )]);

    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.api_base_url(),
      "https://admin.example.com/api/"
    );
    assert_eq!(
      cfg.calendar().expect("calendar"),
      CalendarSystem::Jalali
    );
    assert_eq!(
      cfg
        .search_debounce()
        .expect("debounce"),
      Duration::from_millis(250)
    );
    assert_eq!(
      cfg.resource_names(),
      vec![
        "blog".to_string(),
        "ticket".to_string()
      ]
    );
  }

  #[test]
  fn defaults_apply_without_file() {
    let cfg = Config::from_str_lines("")
      .expect("empty config");
    assert_eq!(
      cfg.api_timeout().expect("timeout"),
      Duration::from_secs(30)
    );
    assert_eq!(
      cfg
        .search_debounce()
        .expect("debounce"),
      Duration::from_millis(600)
    );
    assert_eq!(
      cfg
        .range_normalizer()
        .expect("normalizer")
        .timezone(),
      chrono_tz::UTC
    );
    assert_eq!(
      cfg.get_bool("color").expect("color"),
      Some(true)
    );
    assert_eq!(
      cfg.get_bool("missing").expect("unset"),
      None
    );
  }

  #[test]
  fn rejects_malformed_lines_and_values() {
    assert!(
      Config::from_str_lines(
        "not a key value line"
      )
      .is_err()
    );

    let cfg = Config::from_str_lines(
      "api.timeout_secs = soon\n\
       timezone = Mars/Olympus"
    )
    .expect("parse");
    assert!(cfg.api_timeout().is_err());
    assert!(
      cfg.range_normalizer().is_err()
    );

    let cfg = Config::from_str_lines(
      "color = sometimes"
    )
    .expect("parse");
    assert!(cfg.get_bool("color").is_err());
  }
}
