//! Declared path settings per product family.
//!
//! These are the seeds the built-in registry is populated from. Every
//! dataset gets the same ordered groups: the local mirror first, then the
//! network shares, and last the bundled fixtures, which the resolver only
//! consults when forced.

use crate::constants::{
    CLIMERS_GROUP, LOCAL_GROUP, RADAR_GROUP, TEST_PATH_GROUP, group_root,
};
use crate::models::{DatasetId, HostClass};
use crate::paths::{HostPaths, PathConfig};
use crate::products::ProductSpec;

/// Identity → path configuration, in declaration order.
pub type PathSettings = Vec<(DatasetId, PathConfig)>;

fn join_for_host(root: &str, relative: &str, host: HostClass) -> String {
    match host {
        HostClass::Win => format!("{}\\{}", root, relative.replace('/', "\\")),
        HostClass::Lin => format!("{}/{}", root, relative),
    }
}

fn group_paths(group: &str, relative: &str) -> HostPaths {
    let for_host = |host| group_root(group, host).map(|root| join_for_host(root, relative, host));
    HostPaths {
        win: for_host(HostClass::Win),
        lin: for_host(HostClass::Lin),
    }
}

/// Standard configuration: `relative` below every production root and the
/// identity tokens below the fixture root.
pub fn standard_config(id: &DatasetId, relative: &str) -> PathConfig {
    let fixture = id.tokens().join("/");
    PathConfig::new()
        .with_group(LOCAL_GROUP, group_paths(LOCAL_GROUP, relative))
        .with_group(RADAR_GROUP, group_paths(RADAR_GROUP, relative))
        .with_group(CLIMERS_GROUP, group_paths(CLIMERS_GROUP, relative))
        .with_group(TEST_PATH_GROUP, group_paths(TEST_PATH_GROUP, &fixture))
}

fn seed(tokens: &[&str], relative: &str) -> (DatasetId, PathConfig) {
    let id = DatasetId::from(tokens);
    let config = standard_config(&id, relative);
    (id, config)
}

pub fn esa_cci_sm() -> PathSettings {
    let mut settings = Vec::new();
    for version in ["v033", "v045", "v047", "v052", "v061"] {
        for product in ["COMBINED", "ACTIVE", "PASSIVE"] {
            let relative = format!(
                "ESA_CCI_SM/{}/{}/timeseries",
                version,
                product.to_lowercase()
            );
            settings.push(seed(&["ESA_CCI_SM", version, product], &relative));
        }
    }
    settings
}

pub fn c3s_sm() -> PathSettings {
    let mut settings = Vec::new();
    for version in ["v201706", "v202012"] {
        for product in ["COMBINED", "ACTIVE", "PASSIVE"] {
            let relative = format!(
                "C3S/{}/TCDR/063_images_to_ts/{}-DAILY",
                version,
                product.to_lowercase()
            );
            settings.push(seed(&["C3S_SM", version, product, "DAILY"], &relative));
        }
    }
    settings
}

pub fn smap_l3() -> PathSettings {
    let mut settings = Vec::new();
    for version in ["v6", "v8"] {
        for overpass in ["AM", "PM"] {
            let relative = format!("SMAP/SPL3SMP_{}/timeseries/{}", version, overpass.to_lowercase());
            settings.push(seed(&["SMAP_L3", version, overpass], &relative));
        }
    }
    settings
}

pub fn era5() -> PathSettings {
    vec![
        seed(&["ERA5", "v20190613"], "ERA5/datasets/timeseries/v20190613"),
        seed(&["ERA5_LAND", "v20190904"], "ERA5-Land/datasets/timeseries/v20190904"),
    ]
}

pub fn gldas() -> PathSettings {
    vec![seed(
        &["GLDAS", "v21", "025", "3H"],
        "GLDAS/GLDAS_NOAH025_3H.2.1/timeseries",
    )]
}

pub fn smos_ic() -> PathSettings {
    vec![
        seed(&["SMOS_IC", "v105", "ASC"], "SMOS/SMOS_IC/v105/timeseries/ASC"),
        seed(&["SMOS_IC", "v105", "DES"], "SMOS/SMOS_IC/v105/timeseries/DES"),
    ]
}

/// Path settings paired with the family that reads them.
pub fn builtin() -> Vec<(&'static ProductSpec, PathSettings)> {
    use crate::products::{C3S_SM, ERA5, ESA_CCI_SM, GLDAS, SMAP_L3, SMOS_IC};
    vec![
        (&ESA_CCI_SM, esa_cci_sm()),
        (&C3S_SM, c3s_sm()),
        (&SMAP_L3, smap_l3()),
        (&ERA5, era5()),
        (&GLDAS, gldas()),
        (&SMOS_IC, smos_ic()),
    ]
}
