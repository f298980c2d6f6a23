use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;

use tempo_operator_metadata::quantity::{
    QuantityError, bounded_quantity_value, cpu_from_millis, memory_from_bytes,
};
use tempo_operator_metadata::stack::TempoStackSpec;

use crate::naming;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// requests are this share of the limits, in per mille
const REQUEST_PER_MILLE: u64 = 300;

/// share of the total budget in per mille, (cpu, memory)
fn ratio(component: &str) -> Option<(u64, u64)> {
    match component {
        naming::DISTRIBUTOR => Some((260, 110)),
        naming::INGESTER => Some((370, 480)),
        naming::COMPACTOR => Some((150, 170)),
        naming::QUERIER => Some((110, 150)),
        naming::QUERY_FRONTEND => Some((80, 60)),
        naming::GATEWAY => Some((30, 30)),
        _ => None,
    }
}

/// `per_mille` of `value`, never above `value`
fn share(value: u64, per_mille: u64) -> u64 {
    let part = u128::from(value) * u128::from(per_mille.min(1000)) / 1000;
    u64::try_from(part).unwrap_or(value)
}

/// resources of one component
///
/// An explicit override on the component wins. Otherwise the component gets its
/// share of `resources.total`, or nothing when no total is set.
pub(super) fn resources(
    spec: &TempoStackSpec,
    component: &str,
    overrides: Option<&ResourceRequirements>,
) -> Result<Option<ResourceRequirements>, QuantityError> {
    if let Some(overrides) = overrides {
        return Ok(Some(overrides.clone()));
    }
    let Some(total) = spec.resources.total.as_ref() else {
        return Ok(None);
    };
    let Some((cpu_ratio, memory_ratio)) = ratio(component) else {
        return Ok(None);
    };
    let Some(limits) = total.limits.as_ref() else {
        return Ok(None);
    };

    let mut component_limits = BTreeMap::new();
    let mut component_requests = BTreeMap::new();

    if let Some(cpu) = limits.get(CPU) {
        // bounded to 2^53 cores, so the millicores fit in u64
        let millis = (bounded_quantity_value(cpu)? * 1000.0).round() as u64;
        let limit = share(millis, cpu_ratio);
        component_limits.insert(CPU.to_owned(), cpu_from_millis(limit));
        component_requests.insert(
            CPU.to_owned(),
            cpu_from_millis(share(limit, REQUEST_PER_MILLE)),
        );
    }
    if let Some(memory) = limits.get(MEMORY) {
        let bytes = bounded_quantity_value(memory)?.round() as u64;
        let limit = share(bytes, memory_ratio);
        component_limits.insert(MEMORY.to_owned(), memory_from_bytes(limit));
        component_requests.insert(
            MEMORY.to_owned(),
            memory_from_bytes(share(limit, REQUEST_PER_MILLE)),
        );
    }

    if component_limits.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResourceRequirements {
        limits: Some(component_limits),
        requests: Some(component_requests),
        ..Default::default()
    }))
}

#[cfg(test)]
pub(super) fn total(cpu: &str, memory: &str) -> ResourceRequirements {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    ResourceRequirements {
        limits: Some(BTreeMap::from([
            (CPU.to_owned(), Quantity(cpu.to_owned())),
            (MEMORY.to_owned(), Quantity(memory.to_owned())),
        ])),
        ..Default::default()
    }
}

#[cfg(test)]
mod test {

    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use pretty_assertions::assert_eq;

    use super::*;

    fn spec() -> TempoStackSpec {
        let mut spec = TempoStackSpec::default();
        spec.resources.total = Some(total("2", "2Gi"));
        spec
    }

    #[test]
    fn test_split() {
        let ingester = resources(&spec(), naming::INGESTER, None)
            .expect("quantities")
            .expect("resources");
        let limits = ingester.limits.expect("limits");
        assert_eq!(limits[CPU], Quantity("740m".to_owned()));
        assert_eq!(limits[MEMORY], memory_from_bytes(2_147_483_648 * 480 / 1000));
        let requests = ingester.requests.expect("requests");
        assert_eq!(requests[CPU], Quantity("222m".to_owned()));
    }

    #[test]
    fn test_override_wins() {
        let explicit = total("1", "1Gi");
        let resources = resources(&spec(), naming::QUERIER, Some(&explicit))
            .expect("quantities")
            .expect("resources");
        assert_eq!(resources, explicit);
    }

    #[test]
    fn test_no_budget() {
        let spec = TempoStackSpec::default();
        assert_eq!(resources(&spec, naming::DISTRIBUTOR, None), Ok(None));
    }

    #[test]
    fn test_invalid_budget() {
        let mut spec = TempoStackSpec::default();
        spec.resources.total = Some(total("two", "2Gi"));
        assert!(resources(&spec, naming::DISTRIBUTOR, None).is_err());
    }

    #[test]
    fn test_oversized_budget_is_rejected() {
        let mut spec = TempoStackSpec::default();
        spec.resources.total = Some(total("2", "1E"));
        assert_eq!(
            resources(&spec, naming::INGESTER, None),
            Err(QuantityError::OutOfRange("1E".to_owned()))
        );

        spec.resources.total = Some(total("10P", "2Gi"));
        assert_eq!(
            resources(&spec, naming::INGESTER, None),
            Err(QuantityError::OutOfRange("10P".to_owned()))
        );
    }

    #[test]
    fn test_largest_budget_splits() {
        let mut spec = TempoStackSpec::default();
        spec.resources.total = Some(total("9000T", "8Pi"));
        let ingester = resources(&spec, naming::INGESTER, None)
            .expect("quantities")
            .expect("resources");
        let limits = ingester.limits.expect("limits");
        assert_eq!(
            limits[CPU],
            cpu_from_millis(share(9_000_000_000_000_000_000, 370))
        );
        assert_eq!(limits[MEMORY], memory_from_bytes(share(1 << 53, 480)));
    }
}
