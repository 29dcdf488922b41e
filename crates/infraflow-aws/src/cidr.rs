//! Subnet CIDR allocation

use crate::error::{AwsError, Result};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::Ipv4Addr;

/// Offset of the first private /24 under the fixed-offset scheme
const PRIVATE_OFFSET: u8 = 10;

/// Parse an IPv4 CIDR block, rejecting host bits
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Net> {
    let net: Ipv4Net = cidr.trim().parse().map_err(|e| AwsError::InvalidCidr {
        cidr: cidr.to_string(),
        reason: format!("{}", e),
    })?;
    if net.trunc() != net {
        return Err(AwsError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: format!("host bits are set, did you mean {}?", net.trunc()),
        });
    }
    Ok(net)
}

/// Carve `count` consecutive `/subnet_prefix` blocks out of `base`
pub fn allocate_subnets(base: Ipv4Net, count: usize, subnet_prefix: u8) -> Result<Vec<Ipv4Net>> {
    if subnet_prefix < base.prefix_len() || subnet_prefix > 32 {
        return Err(AwsError::InvalidCidr {
            cidr: base.to_string(),
            reason: format!("cannot be split into /{} subnets", subnet_prefix),
        });
    }
    let subnets: Vec<Ipv4Net> = base
        .subnets(subnet_prefix)
        .map_err(|e| AwsError::InvalidCidr {
            cidr: base.to_string(),
            reason: format!("{}", e),
        })?
        .take(count)
        .collect();
    if subnets.len() < count {
        return Err(AwsError::CidrExhausted(format!(
            "{} holds only {} /{} subnets, {} requested",
            base,
            subnets.len(),
            subnet_prefix,
            count
        )));
    }
    Ok(subnets)
}

/// Public and private subnet blocks, one of each per zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetLayout {
    pub public: Vec<Ipv4Net>,
    pub private: Vec<Ipv4Net>,
}

/// How subnet blocks are derived when not supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SubnetStrategy {
    /// `/24` blocks: public at third octet `i`, private at `i + 10`
    #[default]
    FixedOffset,

    /// Consecutive `/subnet_prefix` blocks, public half first
    Sequential { subnet_prefix: u8 },
}

impl SubnetStrategy {
    pub fn derive(&self, base: Ipv4Net, zones: usize) -> Result<SubnetLayout> {
        let layout = match *self {
            SubnetStrategy::FixedOffset => fixed_offset(base, zones)?,
            SubnetStrategy::Sequential { subnet_prefix } => {
                let mut public = allocate_subnets(base, zones * 2, subnet_prefix)?;
                let private = public.split_off(zones);
                SubnetLayout { public, private }
            }
        };
        validate_layout(base, &layout)?;
        Ok(layout)
    }
}

fn fixed_offset(base: Ipv4Net, zones: usize) -> Result<SubnetLayout> {
    if base.prefix_len() > 16 {
        return Err(AwsError::CidrExhausted(format!(
            "fixed-offset subnets need a /16 or wider block, got {}",
            base
        )));
    }
    if zones > PRIVATE_OFFSET as usize {
        return Err(AwsError::CidrOverlap(format!(
            "fixed-offset subnets support at most {} zones, {} requested",
            PRIVATE_OFFSET, zones
        )));
    }
    let [o1, o2, _, _] = base.network().octets();
    let block = |third: u8| {
        Ipv4Net::new(Ipv4Addr::new(o1, o2, third, 0), 24).map_err(|e| AwsError::InvalidCidr {
            cidr: format!("{}.{}.{}.0/24", o1, o2, third),
            reason: format!("{}", e),
        })
    };
    let mut layout = SubnetLayout {
        public: Vec::with_capacity(zones),
        private: Vec::with_capacity(zones),
    };
    for i in 0..zones as u8 {
        layout.public.push(block(i)?);
        layout.private.push(block(i + PRIVATE_OFFSET)?);
    }
    Ok(layout)
}

/// Check that every subnet lies in `base` and no two subnets overlap
pub fn validate_layout(base: Ipv4Net, layout: &SubnetLayout) -> Result<()> {
    let all: Vec<&Ipv4Net> = layout.public.iter().chain(layout.private.iter()).collect();
    for subnet in &all {
        if !base.contains(*subnet) {
            return Err(AwsError::CidrExhausted(format!(
                "subnet {} is outside of {}",
                subnet, base
            )));
        }
    }
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            if a.contains(&b.network()) || b.contains(&a.network()) {
                return Err(AwsError::CidrOverlap(format!("{} and {}", a, b)));
            }
        }
    }
    Ok(())
}
