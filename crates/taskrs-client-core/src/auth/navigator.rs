/// Sends the user back to the login screen.
///
/// Called when the client learns it has no usable credential: a request came
/// back 401, or a refresh was attempted without a refresh token. What
/// "navigate" means is up to the front end.
pub trait Navigator: Send + Sync {
    fn navigate_to_login(&self);
}

impl<F> Navigator for F
where
    F: Fn() + Send + Sync,
{
    fn navigate_to_login(&self) {
        self()
    }
}

/// Navigator for headless use: the redirect is only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate_to_login(&self) {
        tracing::warn!("Login required");
    }
}
