//! Fixed registry of parity cases
//!
//! Every endpoint that should be checked for parity is listed here and
//! nowhere else. Payloads are percent-encoded (and base64-encoded where the
//! endpoint expects it) so both services receive byte-identical requests.

use crate::compare::ContentKind;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

const SS_LINK: &str = "ss://YWVzLTI1Ni1nY206cGFzc0BleGFtcGxlLmNvbTo0NDM=#NodeA";
const TROJAN_LINK: &str = "trojan://password@example.org:443#NodeB";
const RULESET_PATH: &str = "rules/LocalAreaNetwork.list";

/// One request applied identically to both implementations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub id: String,
    pub feature: String,
    pub kind: ContentKind,
    pub path: String,
}

impl CaseDefinition {
    fn new(id: &str, feature: &str, kind: ContentKind, path: String) -> Self {
        Self {
            id: id.to_string(),
            feature: feature.to_string(),
            kind,
            path,
        }
    }
}

/// URL-safe base64 without padding
pub fn b64_urlsafe_no_pad(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Build the ordered case list
pub fn build_cases() -> Vec<CaseDefinition> {
    let ss = urlencoding::encode(SS_LINK);
    let mixed = urlencoding::encode(&format!("{}|{}", SS_LINK, TROJAN_LINK)).into_owned();
    let ruleset = b64_urlsafe_no_pad(RULESET_PATH);
    let ruleset = urlencoding::encode(&ruleset);

    vec![
        CaseDefinition::new(
            "version",
            "Version Endpoint",
            ContentKind::Version,
            "/version".to_string(),
        ),
        CaseDefinition::new(
            "sub_clash",
            "Sub Basic Clash",
            ContentKind::Yaml,
            format!("/sub?target=clash&url={}", ss),
        ),
        CaseDefinition::new(
            "sub_ss",
            "Sub Basic SS",
            ContentKind::Text,
            format!("/sub?target=ss&url={}", ss),
        ),
        CaseDefinition::new(
            "sub_quanx",
            "Sub QuanX",
            ContentKind::Text,
            format!("/sub?target=quanx&url={}", ss),
        ),
        CaseDefinition::new(
            "sub_singbox",
            "Sub SingBox",
            ContentKind::Json,
            format!("/sub?target=singbox&url={}", mixed),
        ),
        CaseDefinition::new(
            "sub_auto",
            "Target Auto",
            ContentKind::Text,
            format!("/sub?target=auto&url={}", ss),
        ),
        CaseDefinition::new(
            "sub_script",
            "Clash Script Param",
            ContentKind::Yaml,
            format!("/sub?target=clash&script=true&url={}", ss),
        ),
        CaseDefinition::new(
            "surge2clash",
            "Surge2Clash Endpoint",
            ContentKind::Yaml,
            format!("/surge2clash?url={}", ss),
        ),
        CaseDefinition::new(
            "getprofile",
            "GetProfile Endpoint",
            ContentKind::Yaml,
            "/getprofile?name=profiles/example_profile.ini&token=password".to_string(),
        ),
        CaseDefinition::new(
            "getruleset",
            "GetRuleset Endpoint",
            ContentKind::Text,
            format!("/getruleset?type=1&url={}&group=DIRECT", ruleset),
        ),
        CaseDefinition::new(
            "render",
            "Render Endpoint",
            ContentKind::Text,
            "/render?path=base/all_base.tpl".to_string(),
        ),
        CaseDefinition::new(
            "alias_clash",
            "Alias Endpoint Clash",
            ContentKind::Yaml,
            format!("/clash?url={}", ss),
        ),
    ]
}
