use std::sync::Arc;
use std::time::Duration;

use compress;
use server::Config;

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            first_byte_timeout: Duration::new(5, 0),
            keep_alive_timeout: Duration::new(90, 0),
            headers_timeout: Duration::new(10, 0),
            input_body_byte_timeout: Duration::new(15, 0),
            input_body_whole_timeout: Duration::new(3600, 0),
            output_body_byte_timeout: Duration::new(15, 0),
            output_body_whole_timeout: Duration::new(3600, 0),
            max_request_turns: None,
            server_header: concat!("tk-fbm/",
                env!("CARGO_PKG_VERSION")).to_string(),
            allow_proxy_target: false,
            compression: Some(compress::Registry::default()),
        }
    }
    /// Time to wait for the first byte of a fresh connection
    pub fn first_byte_timeout(&mut self, value: Duration) -> &mut Self {
        self.first_byte_timeout = value;
        self
    }
    /// Time an idle keep-alive connection is kept around
    pub fn keep_alive_timeout(&mut self, value: Duration) -> &mut Self {
        self.keep_alive_timeout = value;
        self
    }
    /// Time to receive a full request head once its first byte arrived
    pub fn headers_timeout(&mut self, value: Duration) -> &mut Self {
        self.headers_timeout = value;
        self
    }
    /// Max quiet interval between two reads of the request body
    pub fn input_body_byte_timeout(&mut self, value: Duration) -> &mut Self {
        self.input_body_byte_timeout = value;
        self
    }
    /// Max total time of receiving a request body
    pub fn input_body_whole_timeout(&mut self, value: Duration)
        -> &mut Self
    {
        self.input_body_whole_timeout = value;
        self
    }
    /// Max quiet interval between two writes of the response
    pub fn output_body_byte_timeout(&mut self, value: Duration)
        -> &mut Self
    {
        self.output_body_byte_timeout = value;
        self
    }
    /// Max total time of sending a response
    pub fn output_body_whole_timeout(&mut self, value: Duration)
        -> &mut Self
    {
        self.output_body_whole_timeout = value;
        self
    }
    /// Cap the number of requests served over one connection
    ///
    /// When the cap is reached the last response carries
    /// `Connection: close` and the connection is shut down after the
    /// flush.
    pub fn max_request_turns(&mut self, value: usize) -> &mut Self {
        self.max_request_turns = Some(value);
        self
    }
    /// The value of the `Server` header the engine adds
    pub fn server_header<T: Into<String>>(&mut self, value: T) -> &mut Self
    {
        self.server_header = value.into();
        self
    }
    /// Accept absolute-form request targets whose authority doesn't
    /// match the `Host` header (proxy-style requests)
    pub fn allow_proxy_target(&mut self, value: bool) -> &mut Self {
        self.allow_proxy_target = value;
        self
    }
    /// Replace the compressor registry
    pub fn compression(&mut self, registry: Arc<compress::Registry>)
        -> &mut Self
    {
        self.compression = Some(registry);
        self
    }
    /// Turn response compression off entirely
    pub fn disable_compression(&mut self) -> &mut Self {
        self.compression = None;
        self
    }
    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}
