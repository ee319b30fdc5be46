use crate::twamp::RunController;

#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
}
