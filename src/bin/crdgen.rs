use kube::CustomResourceExt;
use evroc_capi_provider::crd::{EvrocCluster, EvrocMachine, EvrocMachineTemplate};

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        EvrocCluster::crd(),
        EvrocMachine::crd(),
        EvrocMachineTemplate::crd(),
    ];
    let docs = crds
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    print!("{}", docs.join("---\n"));
    Ok(())
}
