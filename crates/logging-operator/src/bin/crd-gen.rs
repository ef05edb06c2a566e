//! Print the CRDs as a multi-document YAML stream.

use kube::CustomResourceExt;

use logging_operator::crds::{ClusterLogForwarder, ClusterLogging};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ClusterLogging::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&ClusterLogForwarder::crd())?);
    Ok(())
}
