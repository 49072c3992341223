use kube::CustomResourceExt;

use locust_operator::locusttest::LocustTest;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&LocustTest::crd())?);
    Ok(())
}
