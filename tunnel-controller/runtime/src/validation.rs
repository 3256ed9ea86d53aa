use crate::k8s::{CloudflareSpec, TunnelSpec};
use anyhow::{bail, Result};
use regex::Regex;

/// Object names must be DNS-1123 subdomains.
const DNS_SUBDOMAIN_REGEX: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";
const DNS_SUBDOMAIN_MAX_LEN: usize = 253;

pub(crate) fn validate_ingress(spec: &CloudflareSpec) -> Result<()> {
    if spec.tunnel_name.is_empty() {
        bail!("tunnel_name must be set");
    }
    validate_object_name(&spec.tunnel_name)?;

    if spec.replicas < 0 {
        bail!("replicas must not be negative: {}", spec.replicas);
    }

    let catch_all = spec.ingress.iter().filter(|r| r.is_catch_all()).count();
    if catch_all > 1 {
        bail!("at most one ingress rule may omit its hostname, found {catch_all}");
    }

    if let Some(i) = spec.ingress.iter().position(|r| r.service.is_empty()) {
        bail!("ingress rule {i} has no service");
    }

    Ok(())
}

pub(crate) fn validate_tunnel(spec: &TunnelSpec, old: Option<&TunnelSpec>) -> Result<()> {
    if let Some(old_id) = old.and_then(|o| o.tunnel_id.as_deref()) {
        if !old_id.is_empty() && spec.tunnel_id.as_deref() != Some(old_id) {
            bail!("tunnelID is immutable once set");
        }
    }

    if let Some(secret) = spec.credentials_secret.as_deref() {
        if secret.is_empty() {
            bail!("credentialsSecret must not be empty when set");
        }
        validate_object_name(secret)?;
    }

    Ok(())
}

fn validate_object_name(name: &str) -> Result<()> {
    let regex = Regex::new(DNS_SUBDOMAIN_REGEX).expect("should_compile");
    if name.len() > DNS_SUBDOMAIN_MAX_LEN || !regex.is_match(name) {
        bail!("{name:?} is not a valid object name");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::IngressRule;

    fn rule(hostname: &str, service: &str) -> IngressRule {
        IngressRule {
            hostname: hostname.to_string(),
            service: service.to_string(),
        }
    }

    fn spec(ingress: Vec<IngressRule>) -> CloudflareSpec {
        CloudflareSpec {
            ingress,
            tunnel_name: "edge".to_string(),
            replicas: 1,
        }
    }

    #[test]
    fn accepts_single_catch_all() {
        validate_ingress(&spec(vec![
            rule("a.example.com", "http://svc-a:80"),
            rule("", "http://default:80"),
        ]))
        .expect("spec is valid");
    }

    #[test]
    fn rejects_two_catch_alls() {
        let err = validate_ingress(&spec(vec![
            rule("", "http://default:80"),
            rule("", "http://other:80"),
        ]))
        .expect_err("spec is invalid");
        assert!(err.to_string().contains("at most one"), "{err}");
    }

    #[test]
    fn rejects_bad_fields() {
        let mut bad = spec(vec![]);
        bad.tunnel_name = String::new();
        assert!(validate_ingress(&bad).is_err());

        let mut bad = spec(vec![]);
        bad.tunnel_name = "Not_A_Name".to_string();
        assert!(validate_ingress(&bad).is_err());

        let mut bad = spec(vec![]);
        bad.replicas = -1;
        assert!(validate_ingress(&bad).is_err());

        assert!(validate_ingress(&spec(vec![rule("a.example.com", "")])).is_err());

        let mut zero = spec(vec![]);
        zero.replicas = 0;
        validate_ingress(&zero).expect("zero replicas are allowed");
    }

    #[test]
    fn tunnel_id_is_immutable() {
        let old = TunnelSpec {
            tunnel_id: Some("abc".to_string()),
            credentials_secret: Some("creds".to_string()),
        };
        validate_tunnel(&old, Some(&old)).expect("unchanged id is valid");

        let changed = TunnelSpec {
            tunnel_id: Some("def".to_string()),
            ..old.clone()
        };
        assert!(validate_tunnel(&changed, Some(&old)).is_err());

        let cleared = TunnelSpec {
            tunnel_id: None,
            ..old.clone()
        };
        assert!(validate_tunnel(&cleared, Some(&old)).is_err());

        // An empty id may still be filled in.
        let unset = TunnelSpec::default();
        validate_tunnel(&old, Some(&unset)).expect("setting an id is valid");
        validate_tunnel(&old, None).expect("creation is valid");
    }

    #[test]
    fn credentials_secret_must_be_named() {
        let spec = TunnelSpec {
            tunnel_id: None,
            credentials_secret: Some(String::new()),
        };
        assert!(validate_tunnel(&spec, None).is_err());
    }
}
