//! Prints the CustomResourceDefinition manifests as a multi-document YAML stream.

use crds::{VirtualMachine, VirtualMachineClass, VirtualMachineImage, VirtualNetworkInterface};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        VirtualMachine::crd(),
        VirtualMachineClass::crd(),
        VirtualMachineImage::crd(),
        VirtualNetworkInterface::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
