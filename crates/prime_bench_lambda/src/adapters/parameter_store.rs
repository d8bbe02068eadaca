pub trait ParameterStore {
    fn get_parameter(&self, name: &str) -> Result<String, String>;
}
