use reqwest::{Client, Error};

pub struct HttpClient;

impl HttpClient {
    pub const USER_AGENT: &'static str = "oxistore/0.1.0";

    /// Shared client for the GET side of the pipelines. No global
    /// timeout: every read step carries its own deadline.
    pub fn new() -> Result<Client, Error> {
        Client::builder().user_agent(Self::USER_AGENT).build()
    }
}
