use crate::{resource_meta, MeshInfo};
use anyhow::{bail, ensure, Context, Result};
use mesh_policy_core::{
    authz::{
        Action, AuthorizationPolicy, AuthorizationRule, Condition, ConditionKey, ConditionValues,
        OperationMatch, SourceMatch,
    },
    NetworkMatch, ValueMatch,
};
use mesh_policy_k8s_api::security::{authorization_policy as api, AuthorizationPolicy as ApiPolicy};

pub fn authorization_policy(policy: ApiPolicy, mesh: &MeshInfo) -> Result<AuthorizationPolicy> {
    let meta = resource_meta(&policy.metadata, mesh);
    let api::AuthorizationPolicySpec {
        selector,
        action,
        rules,
    } = policy.spec;

    let action = match action.unwrap_or(api::Action::Allow) {
        api::Action::Allow => Action::Allow,
        api::Action::Deny => Action::Deny,
        api::Action::Audit => Action::Audit,
        api::Action::Custom => bail!("CUSTOM authorization policies are not supported"),
    };

    let rules = rules
        .into_iter()
        .enumerate()
        .map(|(idx, rule)| authorization_rule(rule).with_context(|| format!("rules[{idx}]")))
        .collect::<Result<Vec<_>>>()?;

    Ok(AuthorizationPolicy {
        meta,
        action,
        selector: selector.filter(|s| !s.is_empty()),
        rules,
    })
}

fn authorization_rule(api::Rule { from, to, when }: api::Rule) -> Result<AuthorizationRule> {
    let from = from
        .into_iter()
        .map(|api::RuleFrom { source }| source_match(source))
        .collect::<Result<Vec<_>>>()
        .context("from")?;
    let to = to
        .into_iter()
        .map(|api::RuleTo { operation }| operation_match(operation))
        .collect::<Result<Vec<_>>>()
        .context("to")?;
    let when = when
        .into_iter()
        .map(condition)
        .collect::<Result<Vec<_>>>()
        .context("when")?;
    Ok(AuthorizationRule { from, to, when })
}

fn source_match(
    api::Source {
        principals,
        not_principals,
        request_principals,
        not_request_principals,
        namespaces,
        not_namespaces,
        ip_blocks,
        not_ip_blocks,
        remote_ip_blocks,
        not_remote_ip_blocks,
    }: api::Source,
) -> Result<SourceMatch> {
    let principal = |values: Vec<String>| -> Vec<ValueMatch> {
        values.iter().map(|v| ValueMatch::principal(v)).collect()
    };

    Ok(SourceMatch {
        principals: principal(principals),
        not_principals: principal(not_principals),
        request_principals: values(request_principals),
        not_request_principals: values(not_request_principals),
        namespaces: values(namespaces),
        not_namespaces: values(not_namespaces),
        ip_blocks: networks(ip_blocks).context("ipBlocks")?,
        not_ip_blocks: networks(not_ip_blocks).context("notIpBlocks")?,
        remote_ip_blocks: networks(remote_ip_blocks).context("remoteIpBlocks")?,
        not_remote_ip_blocks: networks(not_remote_ip_blocks).context("notRemoteIpBlocks")?,
    })
}

fn operation_match(
    api::Operation {
        hosts,
        not_hosts,
        ports,
        not_ports,
        methods,
        not_methods,
        paths,
        not_paths,
    }: api::Operation,
) -> Result<OperationMatch> {
    Ok(OperationMatch {
        hosts: values(hosts),
        not_hosts: values(not_hosts),
        ports: port_values(ports).context("ports")?,
        not_ports: port_values(not_ports).context("notPorts")?,
        methods: values(methods),
        not_methods: values(not_methods),
        paths: values(paths),
        not_paths: values(not_paths),
    })
}

fn condition(
    api::Condition {
        key,
        values: vals,
        not_values,
    }: api::Condition,
) -> Result<Condition> {
    let key_str = key;
    let key = key_str.parse::<ConditionKey>()?;
    ensure!(
        !vals.is_empty() || !not_values.is_empty(),
        "condition {key} must set values or notValues"
    );

    let values = if key.is_network() {
        ConditionValues::Networks {
            values: networks(vals).with_context(|| key_str.clone())?,
            not_values: networks(not_values).with_context(|| key_str.clone())?,
        }
    } else {
        ConditionValues::Values {
            values: values(vals),
            not_values: values(not_values),
        }
    };
    Ok(Condition { key, values })
}

fn values(values: Vec<String>) -> Vec<ValueMatch> {
    values.iter().map(|v| ValueMatch::parse(v)).collect()
}

fn networks(nets: Vec<String>) -> Result<Vec<NetworkMatch>> {
    nets.iter()
        .map(|n| NetworkMatch::parse(n).with_context(|| format!("invalid network {n:?}")))
        .collect()
}

fn port_values(ports: Vec<String>) -> Result<Vec<u16>> {
    ports
        .iter()
        .map(|p| p.parse::<u16>().with_context(|| format!("invalid port {p:?}")))
        .collect()
}
