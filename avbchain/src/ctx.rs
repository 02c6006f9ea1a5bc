use crate::{
    codec::{Avbroot, CodecVersion, ImageCodec, check_version},
    config::Config,
    error::Result,
    lp::DynamicPartitionMapper,
    propagate::Propagator,
};
use std::path::Path;

/// Everything a command needs: the configuration and the codec.
pub struct AppContext {
    pub config: Config,
    codec: Box<dyn ImageCodec>,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        let codec = Box::new(Avbroot::new(&config.avbroot));
        Self { config, codec }
    }

    pub fn with_codec(config: Config, codec: Box<dyn ImageCodec>) -> Self {
        Self { config, codec }
    }

    pub fn codec(&self) -> &dyn ImageCodec {
        self.codec.as_ref()
    }

    /// Refuses to continue with a codec that is too old.
    pub fn check_codec(&self) -> Result<CodecVersion> {
        check_version(self.codec())
    }

    pub fn mapper(&self) -> DynamicPartitionMapper<'_> {
        DynamicPartitionMapper::new(self.codec(), &self.config.super_name)
    }

    pub fn propagator(&self, key: &Path, output_dir: &Path) -> Propagator<'_> {
        Propagator::new(self.codec(), key, output_dir).vbmeta_prefix(&self.config.vbmeta_prefix)
    }
}
