//! Static corridor → terminals → routes → timezone lookup.

use chrono_tz::Tz;
use std::collections::HashMap;

use super::identity::{CorridorId, OperatorId, PortSlug, RouteId};
use super::sailing::{CorridorSummary, OperatorLink, TerminalInfo};
use crate::config::{ConfigError, CorridorSettings, OperatorSettings, PortSettings, RouteSettings};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub slug: PortSlug,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub id: OperatorId,
    pub name: String,
    pub status_url: Option<String>,
}

/// One operator's directed service between two terminals.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: RouteId,
    pub operator_id: OperatorId,
    pub origin: PortSlug,
    pub destination: PortSlug,
    pub crossing_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorridorConfig {
    pub id: CorridorId,
    pub name: String,
    pub terminals: Vec<PortSlug>,
    pub routes: Vec<Route>,
    pub timezone: Tz,
}

impl CorridorConfig {
    pub fn contains_port(&self, port: &PortSlug) -> bool {
        self.terminals.contains(port)
    }

    /// Both ends belong to this corridor.
    pub fn covers(&self, from: &PortSlug, to: &PortSlug) -> bool {
        from != to && self.contains_port(from) && self.contains_port(to)
    }

    /// Operators with at least one route here, in route order.
    pub fn operator_ids(&self) -> Vec<OperatorId> {
        let mut ids: Vec<OperatorId> = Vec::new();
        for route in &self.routes {
            if !ids.contains(&route.operator_id) {
                ids.push(route.operator_id.clone());
            }
        }
        ids
    }

    pub fn route_for(
        &self,
        operator_id: &OperatorId,
        from: &PortSlug,
        to: &PortSlug,
    ) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| &r.operator_id == operator_id && &r.origin == from && &r.destination == to)
    }
}

/// All corridors the board can render, plus port and operator metadata.
#[derive(Debug, Clone)]
pub struct CorridorRegistry {
    ports: HashMap<PortSlug, Port>,
    operators: HashMap<OperatorId, Operator>,
    corridors: Vec<CorridorConfig>,
}

impl CorridorRegistry {
    /// The Cape & Islands network.
    pub fn builtin() -> Self {
        // The built-in table is validated by `test_builtin_registry_is_valid`.
        match Self::from_settings(&builtin_ports(), &builtin_operators(), &builtin_corridors()) {
            Ok(registry) => registry,
            Err(e) => {
                log::error!("Built-in corridor table is invalid: {}", e);
                Self {
                    ports: HashMap::new(),
                    operators: HashMap::new(),
                    corridors: Vec::new(),
                }
            }
        }
    }

    /// Build and validate a registry from configuration sections.
    pub fn from_settings(
        ports: &[PortSettings],
        operators: &[OperatorSettings],
        corridors: &[CorridorSettings],
    ) -> Result<Self, ConfigError> {
        let mut port_map = HashMap::new();
        for p in ports {
            let slug = PortSlug::normalize(&p.slug)?;
            port_map.insert(
                slug.clone(),
                Port {
                    slug,
                    name: p.name.clone(),
                    latitude: p.latitude,
                    longitude: p.longitude,
                },
            );
        }

        let operator_map: HashMap<OperatorId, Operator> = operators
            .iter()
            .map(|o| {
                let id = OperatorId::new(&o.id);
                (
                    id.clone(),
                    Operator {
                        id,
                        name: o.name.clone(),
                        status_url: o.status_url.clone(),
                    },
                )
            })
            .collect();

        let mut corridor_list = Vec::with_capacity(corridors.len());
        for c in corridors {
            let corridor = build_corridor(c, &port_map, &operator_map)?;
            if corridor_list
                .iter()
                .any(|existing: &CorridorConfig| existing.id == corridor.id)
            {
                return Err(ConfigError::InvalidCorridor {
                    corridor: c.id.clone(),
                    reason: "duplicate corridor id".to_string(),
                });
            }
            corridor_list.push(corridor);
        }

        Ok(Self {
            ports: port_map,
            operators: operator_map,
            corridors: corridor_list,
        })
    }

    pub fn get(&self, id: &CorridorId) -> Option<&CorridorConfig> {
        self.corridors.iter().find(|c| &c.id == id)
    }

    pub fn corridors(&self) -> &[CorridorConfig] {
        &self.corridors
    }

    pub fn port(&self, slug: &PortSlug) -> Option<&Port> {
        self.ports.get(slug)
    }

    pub fn operator(&self, id: &OperatorId) -> Option<&Operator> {
        self.operators.get(id)
    }

    /// Great-circle distance between a corridor's two terminals.
    pub fn crossing_km(&self, corridor: &CorridorConfig) -> Option<f64> {
        match corridor.terminals.as_slice() {
            [a, b] => {
                let (a, b) = (self.port(a)?, self.port(b)?);
                Some(haversine_km(a.latitude, a.longitude, b.latitude, b.longitude))
            }
            _ => None,
        }
    }

    pub fn summary(&self, corridor: &CorridorConfig) -> CorridorSummary {
        CorridorSummary {
            id: corridor.id.clone(),
            name: corridor.name.clone(),
            timezone: corridor.timezone.name().to_string(),
            crossing_km: self.crossing_km(corridor),
        }
    }

    pub fn terminals(&self, corridor: &CorridorConfig) -> Vec<TerminalInfo> {
        corridor
            .terminals
            .iter()
            .map(|slug| TerminalInfo {
                slug: slug.clone(),
                name: self
                    .port(slug)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| slug.to_string()),
            })
            .collect()
    }

    pub fn operator_links(&self, corridor: &CorridorConfig) -> Vec<OperatorLink> {
        corridor
            .operator_ids()
            .into_iter()
            .map(|id| {
                let operator = self.operator(&id);
                OperatorLink {
                    name: operator
                        .map(|o| o.name.clone())
                        .unwrap_or_else(|| id.to_string()),
                    status_url: operator.and_then(|o| o.status_url.clone()),
                    operator_id: id,
                }
            })
            .collect()
    }
}

impl Default for CorridorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn build_corridor(
    settings: &CorridorSettings,
    ports: &HashMap<PortSlug, Port>,
    operators: &HashMap<OperatorId, Operator>,
) -> Result<CorridorConfig, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCorridor {
        corridor: settings.id.clone(),
        reason,
    };

    let timezone: Tz = settings
        .timezone
        .parse()
        .map_err(|_| ConfigError::InvalidTimezone(settings.timezone.clone()))?;

    let terminals = settings
        .terminals
        .iter()
        .map(|t| PortSlug::normalize(t))
        .collect::<Result<Vec<_>, _>>()?;
    if terminals.len() != 2 || terminals[0] == terminals[1] {
        return Err(invalid("a corridor joins exactly two distinct terminals".to_string()));
    }
    for terminal in &terminals {
        if !ports.contains_key(terminal) {
            return Err(ConfigError::UnknownPort(terminal.to_string()));
        }
    }

    let routes = settings
        .routes
        .iter()
        .map(|r| build_route(r, &terminals, ports, operators))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| match e {
            RouteProblem::Config(c) => c,
            RouteProblem::Invalid(reason) => invalid(reason),
        })?;
    if routes.is_empty() {
        return Err(invalid("corridor has no routes".to_string()));
    }

    Ok(CorridorConfig {
        id: CorridorId::new(&settings.id),
        name: settings.name.clone(),
        terminals,
        routes,
        timezone,
    })
}

enum RouteProblem {
    Config(ConfigError),
    Invalid(String),
}

impl From<crate::models::identity::IdentityError> for RouteProblem {
    fn from(e: crate::models::identity::IdentityError) -> Self {
        RouteProblem::Config(e.into())
    }
}

fn build_route(
    settings: &RouteSettings,
    terminals: &[PortSlug],
    ports: &HashMap<PortSlug, Port>,
    operators: &HashMap<OperatorId, Operator>,
) -> Result<Route, RouteProblem> {
    let origin = PortSlug::normalize(&settings.origin)?;
    let destination = PortSlug::normalize(&settings.destination)?;
    let operator_id = OperatorId::new(&settings.operator);

    if !operators.contains_key(&operator_id) {
        return Err(RouteProblem::Config(ConfigError::UnknownOperator(
            operator_id.to_string(),
        )));
    }
    if origin == destination {
        return Err(RouteProblem::Invalid(format!(
            "route {} starts and ends at {}",
            settings.id, origin
        )));
    }
    if !terminals.contains(&origin) || !terminals.contains(&destination) {
        return Err(RouteProblem::Invalid(format!(
            "route {} leaves the corridor terminals",
            settings.id
        )));
    }

    if let (Some(a), Some(b)) = (ports.get(&origin), ports.get(&destination)) {
        let km = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
        if km <= 0.0 {
            return Err(RouteProblem::Invalid(format!(
                "route {} has zero crossing distance",
                settings.id
            )));
        }
    }

    Ok(Route {
        id: RouteId::new(&settings.id),
        operator_id,
        origin,
        destination,
        crossing_minutes: settings.crossing_minutes,
    })
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

pub fn builtin_ports() -> Vec<PortSettings> {
    [
        ("woods-hole", "Woods Hole", 41.5234, -70.6693),
        ("hyannis", "Hyannis", 41.6362, -70.2826),
        ("vineyard-haven", "Vineyard Haven", 41.4535, -70.6036),
        ("oak-bluffs", "Oak Bluffs", 41.4571, -70.5566),
        ("nantucket", "Nantucket", 41.2835, -70.0995),
    ]
    .into_iter()
    .map(|(slug, name, latitude, longitude)| PortSettings {
        slug: slug.to_string(),
        name: name.to_string(),
        latitude,
        longitude,
    })
    .collect()
}

pub fn builtin_operators() -> Vec<OperatorSettings> {
    vec![
        OperatorSettings {
            id: "ssa".to_string(),
            name: "Steamship Authority".to_string(),
            status_url: Some("https://www.steamshipauthority.com".to_string()),
        },
        OperatorSettings {
            id: "hlc".to_string(),
            name: "Hy-Line Cruises".to_string(),
            status_url: Some("https://www.hylinecruises.com".to_string()),
        },
    ]
}

pub fn builtin_corridors() -> Vec<CorridorSettings> {
    let route = |id: &str, operator: &str, origin: &str, destination: &str, minutes: Option<u32>| {
        RouteSettings {
            id: id.to_string(),
            operator: operator.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            crossing_minutes: minutes,
        }
    };
    let corridor = |id: &str, name: &str, a: &str, b: &str, routes: Vec<RouteSettings>| {
        CorridorSettings {
            id: id.to_string(),
            name: name.to_string(),
            terminals: vec![a.to_string(), b.to_string()],
            timezone: "America/New_York".to_string(),
            routes,
        }
    };

    vec![
        corridor(
            "woods-hole-vineyard-haven",
            "Woods Hole – Vineyard Haven",
            "woods-hole",
            "vineyard-haven",
            vec![
                route("wh-vh-ssa", "ssa", "woods-hole", "vineyard-haven", Some(45)),
                route("vh-wh-ssa", "ssa", "vineyard-haven", "woods-hole", Some(45)),
            ],
        ),
        corridor(
            "woods-hole-oak-bluffs",
            "Woods Hole – Oak Bluffs",
            "woods-hole",
            "oak-bluffs",
            vec![
                route("wh-ob-ssa", "ssa", "woods-hole", "oak-bluffs", Some(45)),
                route("ob-wh-ssa", "ssa", "oak-bluffs", "woods-hole", Some(45)),
            ],
        ),
        corridor(
            "hyannis-nantucket",
            "Hyannis – Nantucket",
            "hyannis",
            "nantucket",
            vec![
                route("hy-nan-ssa", "ssa", "hyannis", "nantucket", Some(135)),
                route("nan-hy-ssa", "ssa", "nantucket", "hyannis", Some(135)),
                route("hy-nan-hlc", "hlc", "hyannis", "nantucket", Some(60)),
                route("nan-hy-hlc", "hlc", "nantucket", "hyannis", Some(60)),
            ],
        ),
        corridor(
            "hyannis-vineyard-haven",
            "Hyannis – Vineyard Haven",
            "hyannis",
            "vineyard-haven",
            vec![
                route("hy-vh-hlc", "hlc", "hyannis", "vineyard-haven", None),
                route("vh-hy-hlc", "hlc", "vineyard-haven", "hyannis", None),
            ],
        ),
    ]
}
