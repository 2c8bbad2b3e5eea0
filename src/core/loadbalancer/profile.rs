//! Declarative pool profiles and pool specifications
//!
//! A profile is an ordered mapping. Three keys are structural and handled
//! specially (`bind_options`, `member_options`, `params`); every other key
//! becomes a `"<key> <value>"` directive, in declaration order.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Key of a per-member option: a position in the sorted member list, or `*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberSlot {
    Index(usize),
    Wildcard,
}

impl MemberSlot {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "*" => Some(MemberSlot::Wildcard),
            other => other.parse().ok().map(MemberSlot::Index),
        }
    }
}

impl fmt::Display for MemberSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberSlot::Index(index) => write!(f, "{}", index),
            MemberSlot::Wildcard => f.write_str("*"),
        }
    }
}

impl Serialize for MemberSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MemberSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SlotVisitor;

        impl<'de> Visitor<'de> for SlotVisitor {
            type Value = MemberSlot;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a member index or \"*\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MemberSlot, E> {
                MemberSlot::parse(v)
                    .ok_or_else(|| E::custom(format!("invalid member slot '{}'", v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MemberSlot, E> {
                usize::try_from(v)
                    .map(MemberSlot::Index)
                    .map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MemberSlot, E> {
                usize::try_from(v)
                    .map(MemberSlot::Index)
                    .map_err(|_| E::custom(format!("invalid member slot {}", v)))
            }
        }

        deserializer.deserialize_any(SlotVisitor)
    }
}

pub type MemberOptions = BTreeMap<MemberSlot, String>;

/// One non-structural profile entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileField {
    /// Raw directives appended verbatim
    Params(Vec<String>),
    /// `"<key> <value>"`
    Directive { key: String, value: String },
}

/// Reusable bundle of load-balancer tuning parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolProfile {
    pub bind_options: Vec<String>,
    pub member_options: MemberOptions,
    pub fields: Vec<ProfileField>,
}

impl PoolProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(ProfileField::Directive {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .push(ProfileField::Params(params.into_iter().map(Into::into).collect()));
        self
    }

    pub fn bind_option(mut self, option: impl Into<String>) -> Self {
        let option = option.into();
        if !self.bind_options.contains(&option) {
            self.bind_options.push(option);
        }
        self
    }

    pub fn member_option(mut self, slot: MemberSlot, option: impl Into<String>) -> Self {
        self.member_options.insert(slot, option.into());
        self
    }
}

fn scalar_to_string(key: &str, value: serde_json::Value) -> Result<String, String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!(
            "profile key '{}' must be a scalar, got {}",
            key, other
        )),
    }
}

impl<'de> Deserialize<'de> for PoolProfile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProfileVisitor;

        impl<'de> Visitor<'de> for ProfileVisitor {
            type Value = PoolProfile;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a pool profile mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<PoolProfile, A::Error> {
                let mut profile = PoolProfile::new();

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "bind_options" => {
                            for option in map.next_value::<Vec<String>>()? {
                                profile = profile.bind_option(option);
                            }
                        }
                        "member_options" => {
                            profile.member_options = map.next_value::<MemberOptions>()?;
                        }
                        "params" => {
                            profile
                                .fields
                                .push(ProfileField::Params(map.next_value::<Vec<String>>()?));
                        }
                        _ => {
                            let value = map.next_value::<serde_json::Value>()?;
                            let value = scalar_to_string(&key, value).map_err(de::Error::custom)?;
                            profile.fields.push(ProfileField::Directive { key, value });
                        }
                    }
                }

                Ok(profile)
            }
        }

        deserializer.deserialize_map(ProfileVisitor)
    }
}

/// A declared pool: which cluster backs it and how it is exposed
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PoolSpec {
    /// Filled from the key the pool is declared under
    #[serde(skip)]
    pub name: String,
    #[serde(default, alias = "pool_cluster_name")]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub bind_port: Option<u16>,
    #[serde(default)]
    pub bind_ssl: Option<String>,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub bind_options: Option<Vec<String>>,
    #[serde(default)]
    pub member_options: Option<MemberOptions>,
}

impl PoolSpec {
    pub fn new(name: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile: profile.into(),
            ..Self::default()
        }
    }

    pub fn with_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_bind(mut self, address: impl Into<String>, port: u16) -> Self {
        self.bind_address = Some(address.into());
        self.bind_port = Some(port);
        self
    }

    pub fn with_ssl(mut self, certificate: impl Into<String>) -> Self {
        self.bind_ssl = Some(certificate.into());
        self
    }

    pub fn with_bind_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bind_options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_member_option(mut self, slot: MemberSlot, option: impl Into<String>) -> Self {
        self.member_options
            .get_or_insert_with(MemberOptions::new)
            .insert(slot, option.into());
        self
    }
}
