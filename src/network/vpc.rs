//! Allocation of a new VPC
//!
//! Fixed shape: one public and one private subnet per availability zone,
//! carved from `10.0.0.0/16`; an internet gateway for the public subnets and
//! `nat_gateways` NAT gateways shared round-robin by the private subnets.

use std::net::Ipv4Addr;

use serde_json::{json, Value};

use super::ResolvedNetwork;
use crate::template::intrinsics::{get_att, get_azs, reference, select, tag};
use crate::template::{ConstructPath, Resource, Template, TemplateError};

/// Address space of an allocated VPC
pub const VPC_CIDR: &str = "10.0.0.0/16";

const VPC_BASE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);
const VPC_PREFIX: u32 = 16;

/// Split the VPC address space into `count` equally sized blocks, using the
/// largest block size that fits them all.
pub fn subnet_cidrs(count: u32) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }
    let extra_bits = 32 - (count - 1).leading_zeros().min(32);
    let prefix = (VPC_PREFIX + extra_bits).min(28);
    let block = 1u32 << (32 - prefix);
    let base = u32::from(VPC_BASE);

    (0..count)
        .map(|i| format!("{}/{}", Ipv4Addr::from(base + i * block), prefix))
        .collect()
}

fn name_tag(stack_name: &str, path: &ConstructPath) -> Value {
    tag(json!("Name"), json!(format!("{}/{}", stack_name, path)))
}

/// Add the VPC resources to `template` and return the resulting network
pub fn allocate(
    template: &mut Template,
    path: &ConstructPath,
    stack_name: &str,
    max_azs: u32,
    nat_gateways: u32,
) -> Result<ResolvedNetwork, TemplateError> {
    let nat_gateways = nat_gateways.min(max_azs);
    let cidrs = subnet_cidrs(max_azs * 2);

    let vpc_id = template.add(
        path,
        Resource::new("AWS::EC2::VPC")
            .with_property("CidrBlock", json!(VPC_CIDR))
            .with_property("EnableDnsHostnames", json!(true))
            .with_property("EnableDnsSupport", json!(true))
            .with_property("InstanceTenancy", json!("default"))
            .with_property("Tags", json!([name_tag(stack_name, path)])),
    )?;

    let igw_path = path.child("IGW");
    let igw_id = template.add(
        &igw_path,
        Resource::new("AWS::EC2::InternetGateway")
            .with_property("Tags", json!([name_tag(stack_name, path)])),
    )?;
    let attachment_id = template.add(
        &path.child("VPCGW"),
        Resource::new("AWS::EC2::VPCGatewayAttachment")
            .with_property("VpcId", reference(&vpc_id))
            .with_property("InternetGatewayId", reference(&igw_id)),
    )?;

    let mut public_subnets = Vec::new();
    let mut nat_ids = Vec::new();
    for az in 0..max_azs {
        let subnet_path = path.child(format!("PublicSubnet{}", az + 1));
        let subnet_id = add_subnet(
            template,
            &subnet_path,
            stack_name,
            &vpc_id,
            az,
            &cidrs[az as usize],
            true,
        )?;
        let route_table_id = add_route_table(template, &subnet_path, stack_name, &vpc_id, &subnet_id)?;

        template.add(
            &subnet_path.child("DefaultRoute"),
            Resource::new("AWS::EC2::Route")
                .with_property("RouteTableId", reference(&route_table_id))
                .with_property("DestinationCidrBlock", json!("0.0.0.0/0"))
                .with_property("GatewayId", reference(&igw_id))
                .with_depends_on(attachment_id.clone()),
        )?;

        if az < nat_gateways {
            let eip_id = template.add(
                &subnet_path.child("EIP"),
                Resource::new("AWS::EC2::EIP")
                    .with_property("Domain", json!("vpc"))
                    .with_property("Tags", json!([name_tag(stack_name, &subnet_path)])),
            )?;
            let nat_id = template.add(
                &subnet_path.child("NATGateway"),
                Resource::new("AWS::EC2::NatGateway")
                    .with_property("AllocationId", get_att(&eip_id, "AllocationId"))
                    .with_property("SubnetId", reference(&subnet_id))
                    .with_property("Tags", json!([name_tag(stack_name, &subnet_path)])),
            )?;
            nat_ids.push(nat_id);
        }

        public_subnets.push(reference(&subnet_id));
    }

    let mut private_subnets = Vec::new();
    for az in 0..max_azs {
        let subnet_path = path.child(format!("PrivateSubnet{}", az + 1));
        let subnet_id = add_subnet(
            template,
            &subnet_path,
            stack_name,
            &vpc_id,
            az,
            &cidrs[(max_azs + az) as usize],
            false,
        )?;
        let route_table_id = add_route_table(template, &subnet_path, stack_name, &vpc_id, &subnet_id)?;

        if !nat_ids.is_empty() {
            let nat_id = &nat_ids[az as usize % nat_ids.len()];
            template.add(
                &subnet_path.child("DefaultRoute"),
                Resource::new("AWS::EC2::Route")
                    .with_property("RouteTableId", reference(&route_table_id))
                    .with_property("DestinationCidrBlock", json!("0.0.0.0/0"))
                    .with_property("NatGatewayId", reference(nat_id)),
            )?;
        }

        private_subnets.push(reference(&subnet_id));
    }

    Ok(ResolvedNetwork {
        vpc_id: reference(&vpc_id),
        public_subnets,
        private_subnets,
    })
}

fn add_subnet(
    template: &mut Template,
    path: &ConstructPath,
    stack_name: &str,
    vpc_id: &str,
    az_index: u32,
    cidr: &str,
    public: bool,
) -> Result<String, TemplateError> {
    let (subnet_type, elb_role) = if public {
        ("Public", "kubernetes.io/role/elb")
    } else {
        ("Private", "kubernetes.io/role/internal-elb")
    };

    template.add(
        &path.child("Subnet"),
        Resource::new("AWS::EC2::Subnet")
            .with_property("CidrBlock", json!(cidr))
            .with_property("VpcId", reference(vpc_id))
            .with_property("AvailabilityZone", select(az_index as usize, get_azs()))
            .with_property("MapPublicIpOnLaunch", json!(public))
            .with_property(
                "Tags",
                json!([
                    tag(json!(elb_role), json!("1")),
                    name_tag(stack_name, path),
                    tag(json!("subnet-type"), json!(subnet_type)),
                ]),
            ),
    )
}

fn add_route_table(
    template: &mut Template,
    path: &ConstructPath,
    stack_name: &str,
    vpc_id: &str,
    subnet_id: &str,
) -> Result<String, TemplateError> {
    let route_table_id = template.add(
        &path.child("RouteTable"),
        Resource::new("AWS::EC2::RouteTable")
            .with_property("VpcId", reference(vpc_id))
            .with_property("Tags", json!([name_tag(stack_name, path)])),
    )?;
    template.add(
        &path.child("RouteTableAssociation"),
        Resource::new("AWS::EC2::SubnetRouteTableAssociation")
            .with_property("RouteTableId", reference(&route_table_id))
            .with_property("SubnetId", reference(subnet_id)),
    )?;
    Ok(route_table_id)
}
