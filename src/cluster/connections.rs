//! Security group wiring
//!
//! Rules are emitted as standalone ingress/egress resources. A rule between
//! two groups is symmetric: the receiving side gets an ingress rule and the
//! sending side an egress rule, unless the sending group already allows all
//! outbound traffic.

use std::fmt;

use serde_json::{json, Value};

use crate::template::intrinsics::get_att;
use crate::template::{ConstructPath, Resource, Template, TemplateError};

/// A protocol and port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Tcp(u16),
    TcpRange(u16, u16),
    AllTcp,
    AllUdp,
    AllIcmp,
    AllTraffic,
}

impl Port {
    pub fn protocol(&self) -> &'static str {
        match self {
            Port::Tcp(_) | Port::TcpRange(_, _) | Port::AllTcp => "tcp",
            Port::AllUdp => "udp",
            Port::AllIcmp => "icmp",
            Port::AllTraffic => "-1",
        }
    }

    /// `(FromPort, ToPort)`; all-traffic rules carry no ports
    pub fn range(&self) -> Option<(i32, i32)> {
        match self {
            Port::Tcp(p) => Some((i32::from(*p), i32::from(*p))),
            Port::TcpRange(from, to) => Some((i32::from(*from), i32::from(*to))),
            Port::AllTcp | Port::AllUdp => Some((0, 65535)),
            Port::AllIcmp => Some((-1, -1)),
            Port::AllTraffic => None,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Tcp(p) => write!(f, "{}", p),
            Port::TcpRange(from, to) => write!(f, "{}-{}", from, to),
            Port::AllTcp => write!(f, "ALL PORTS"),
            Port::AllUdp => write!(f, "UDP ALL PORTS"),
            Port::AllIcmp => write!(f, "ALL ICMP"),
            Port::AllTraffic => write!(f, "ALL TRAFFIC"),
        }
    }
}

/// A security group present in the template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRef {
    pub logical_id: String,
    pub path: ConstructPath,
    /// Whether the group carries an implicit allow-all egress rule
    pub allow_all_outbound: bool,
}

impl SecurityGroupRef {
    pub fn group_id(&self) -> Value {
        get_att(&self.logical_id, "GroupId")
    }
}

/// The other end of a rule
#[derive(Debug, Clone, Copy)]
pub enum Peer<'a> {
    Group(&'a SecurityGroupRef),
    AnyIpv4,
}

impl Peer<'_> {
    fn label(&self) -> String {
        match self {
            Peer::Group(group) => group.logical_id.clone(),
            Peer::AnyIpv4 => "0.0.0.0/0".to_string(),
        }
    }
}

/// Egress rule placeholder that matches no traffic, so the provisioning
/// engine does not install its implicit allow-all rule on groups that must
/// not allow all outbound traffic
pub fn disallow_all_egress() -> Value {
    json!([{
        "CidrIp": "255.255.255.255/32",
        "Description": "Disallow all traffic",
        "FromPort": 252,
        "IpProtocol": "icmp",
        "ToPort": 86
    }])
}

/// Egress rule allowing all outbound traffic
pub fn allow_all_egress() -> Value {
    json!([{
        "CidrIp": "0.0.0.0/0",
        "Description": "Allow all outbound traffic by default",
        "IpProtocol": "-1"
    }])
}

fn rule_resource(
    resource_type: &str,
    group: &SecurityGroupRef,
    peer: Peer<'_>,
    port: Port,
    description: &str,
) -> Resource {
    let is_ingress = resource_type.ends_with("Ingress");
    let mut resource = Resource::new(resource_type)
        .with_property("IpProtocol", json!(port.protocol()))
        .with_property("GroupId", group.group_id())
        .with_property("Description", json!(description));

    if let Some((from, to)) = port.range() {
        resource = resource
            .with_property("FromPort", json!(from))
            .with_property("ToPort", json!(to));
    }

    match (peer, is_ingress) {
        (Peer::Group(other), true) => {
            resource.with_property("SourceSecurityGroupId", other.group_id())
        }
        (Peer::Group(other), false) => {
            resource.with_property("DestinationSecurityGroupId", other.group_id())
        }
        (Peer::AnyIpv4, _) => resource.with_property("CidrIp", json!("0.0.0.0/0")),
    }
}

/// Ingress on `group` from `peer`
pub fn add_ingress(
    template: &mut Template,
    group: &SecurityGroupRef,
    peer: Peer<'_>,
    port: Port,
) -> Result<(), TemplateError> {
    let description = format!("from {}:{}", peer.label(), port);
    let path = group.path.child(&description);
    template.add(
        &path,
        rule_resource("AWS::EC2::SecurityGroupIngress", group, peer, port, &description),
    )?;
    Ok(())
}

/// Egress on `group` to `peer`; a no-op when the group allows all outbound
pub fn add_egress(
    template: &mut Template,
    group: &SecurityGroupRef,
    peer: Peer<'_>,
    port: Port,
) -> Result<(), TemplateError> {
    if group.allow_all_outbound {
        return Ok(());
    }
    let description = format!("to {}:{}", peer.label(), port);
    let path = group.path.child(&description);
    template.add(
        &path,
        rule_resource("AWS::EC2::SecurityGroupEgress", group, peer, port, &description),
    )?;
    Ok(())
}

/// Members of `group` may talk to each other
pub fn allow_internally(
    template: &mut Template,
    group: &SecurityGroupRef,
    port: Port,
) -> Result<(), TemplateError> {
    add_ingress(template, group, Peer::Group(group), port)?;
    add_egress(template, group, Peer::Group(group), port)
}

/// `peer` may open connections to `group`
pub fn allow_from(
    template: &mut Template,
    group: &SecurityGroupRef,
    peer: &SecurityGroupRef,
    port: Port,
) -> Result<(), TemplateError> {
    add_ingress(template, group, Peer::Group(peer), port)?;
    add_egress(template, peer, Peer::Group(group), port)
}

/// `group` may open connections to `peer`
pub fn allow_to(
    template: &mut Template,
    group: &SecurityGroupRef,
    peer: &SecurityGroupRef,
    port: Port,
) -> Result<(), TemplateError> {
    add_egress(template, group, Peer::Group(peer), port)?;
    add_ingress(template, peer, Peer::Group(group), port)
}

/// `group` may open connections anywhere on the IPv4 internet
pub fn allow_to_any_ipv4(
    template: &mut Template,
    group: &SecurityGroupRef,
    port: Port,
) -> Result<(), TemplateError> {
    add_egress(template, group, Peer::AnyIpv4, port)
}

/// Rules a self-managed node group needs to join and serve the cluster
pub fn connect_nodes_to_control_plane(
    template: &mut Template,
    nodes: &SecurityGroupRef,
    control_plane: &SecurityGroupRef,
) -> Result<(), TemplateError> {
    allow_internally(template, nodes, Port::AllTraffic)?;

    allow_from(template, nodes, control_plane, Port::Tcp(443))?;
    allow_from(template, nodes, control_plane, Port::TcpRange(1025, 65535))?;

    allow_to(template, nodes, control_plane, Port::Tcp(443))?;

    allow_to_any_ipv4(template, nodes, Port::AllTcp)?;
    allow_to_any_ipv4(template, nodes, Port::AllUdp)?;
    allow_to_any_ipv4(template, nodes, Port::AllIcmp)
}
