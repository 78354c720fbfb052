use std::collections::BTreeMap;

use anyhow::{Context, bail};
use tracing::debug;

use crate::config::Config;
use crate::filter::FieldSpec;
use crate::mutate::ToggleRule;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Per-resource adapter: where a resource lives on the backend, how its rows
/// are identified and which fields its list screen filters on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub path: String,
    pub page_size: u32,
    pub id_field: String,
    pub list_key: Option<String>,
    pub toggle: ToggleRule,
    pub fields: Vec<FieldSpec>,
    pub columns: Vec<String>,
}

impl ResourceSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: name.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            id_field: "id".to_string(),
            list_key: None,
            toggle: ToggleRule::default(),
            fields: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn with_id_field(mut self, id_field: &str) -> Self {
        self.id_field = id_field.to_string();
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn list_path(&self) -> String {
        format!("{}/list", self.path.trim_end_matches('/'))
    }

    pub fn status_path(&self) -> String {
        format!("{}/changeStatus", self.path.trim_end_matches('/'))
    }

    /// Reads `resource.<name>.*` keys. Unset keys keep the defaults of
    /// [`ResourceSpec::new`].
    #[tracing::instrument(skip(cfg))]
    pub fn from_config(cfg: &Config, name: &str) -> anyhow::Result<Self> {
        let prefix = format!("resource.{name}.");
        let mut spec = ResourceSpec::new(name);
        let mut fields = BTreeMap::new();
        let mut seen = false;

        for (key, value) in cfg.section(&prefix) {
            seen = true;
            match key {
                "path" => spec.path = value.trim().to_string(),
                "page_size" => {
                    let size = value
                        .trim()
                        .parse::<u32>()
                        .with_context(|| format!("invalid page_size for {name}: {value}"))?;
                    if size == 0 {
                        bail!("page_size for {name} must be positive");
                    }
                    spec.page_size = size;
                }
                "id_field" => spec.id_field = value.trim().to_string(),
                "list_key" => spec.list_key = Some(value.trim().to_string()),
                "status" => {
                    spec.toggle = ToggleRule::parse(value)
                        .with_context(|| format!("invalid status pair for {name}"))?;
                }
                "columns" => {
                    spec.columns = value
                        .split(',')
                        .map(str::trim)
                        .filter(|col| !col.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                other => {
                    let Some(field_name) = other.strip_prefix("field.") else {
                        bail!("unknown resource setting {prefix}{other}");
                    };
                    let field = FieldSpec::parse(field_name, value)
                        .with_context(|| format!("invalid filter field for {name}"))?;
                    fields.insert(field_name.to_string(), field);
                }
            }
        }

        if !seen {
            bail!("resource {name} is not configured");
        }

        spec.fields = fields.into_values().collect();
        debug!(
            resource = name,
            path = %spec.path,
            fields = spec.fields.len(),
            "loaded resource"
        );
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceSpec;
    use crate::config::Config;
    use crate::filter::FieldKind;

    #[test]
    fn reads_resource_section() {
        let cfg = Config::from_str_lines(
            "resource.admin.path = panel/admin/\n\
             resource.admin.id_field = adminId\n\
             resource.admin.page_size = 20\n\
             resource.admin.list_key = admins\n\
             resource.admin.columns = name, email\n\
             resource.admin.field.search = text:name\n\
             resource.admin.field.status = enum:status:active|deactive\n",
        )
        .expect("config");

        let spec = ResourceSpec::from_config(&cfg, "admin").expect("resource");
        assert_eq!(spec.list_path(), "panel/admin/list");
        assert_eq!(spec.status_path(), "panel/admin/changeStatus");
        assert_eq!(spec.id_field, "adminId");
        assert_eq!(spec.page_size, 20);
        assert_eq!(spec.list_key.as_deref(), Some("admins"));
        assert_eq!(spec.columns, vec!["name".to_string(), "email".to_string()]);
        assert_eq!(spec.fields.len(), 2);
        assert_eq!(spec.fields[0].name, "search");
        assert!(matches!(spec.fields[1].kind, FieldKind::Enum { .. }));
    }

    #[test]
    fn unknown_resources_and_settings_are_errors() {
        let cfg = Config::from_str_lines("resource.blog.colour = red\n").expect("config");
        assert!(ResourceSpec::from_config(&cfg, "blog").is_err());
        assert!(ResourceSpec::from_config(&cfg, "ticket").is_err());

        let cfg = Config::from_str_lines("resource.blog.page_size = 0\n").expect("config");
        assert!(ResourceSpec::from_config(&cfg, "blog").is_err());
    }
}
