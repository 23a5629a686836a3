use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::{
    blob::{BlobStore, FsBlobStore},
    cache::Caches,
    config::Config,
    detail::DetailStore,
    facility::{
        ChildcarePortal, Domain, FacilitySource, KindergartenRegistry, PlaygroundRegistry,
        SourceError,
    },
    geocode::{AddressGeocodeCache, GeocodeError, KakaoLocal, ReverseGeocodeCache},
    loader::SmartLoader,
    region::RegionTable,
    snapshot::SnapshotStore,
};

pub const REVERSE_GEOCODE_BUCKET: &str = "reverse-geocode-cache";
pub const GEOCODE_BUCKET: &str = "geocode-cache";

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("could not build geocoding client: {0}")]
    Geocode(#[from] GeocodeError),
    #[error("could not build registry client: {0}")]
    Source(#[from] SourceError),
}

pub struct AppState {
    pub config: Config,
    pub reverse: ReverseGeocodeCache,
    pub forward: AddressGeocodeCache,
    pub loaders: HashMap<Domain, Arc<SmartLoader>>,
    pub details: HashMap<Domain, DetailStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        reverse: ReverseGeocodeCache,
        forward: AddressGeocodeCache,
        loaders: HashMap<Domain, Arc<SmartLoader>>,
        details: HashMap<Domain, DetailStore>,
    ) -> Self {
        AppState {
            config,
            reverse,
            forward,
            loaders,
            details,
        }
    }

    /// Wires every cache to a filesystem bucket under `DATA_PATH` and the
    /// real providers.
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let bucket = |name: &str| -> Arc<dyn BlobStore> {
            Arc::new(FsBlobStore::new(config.data_path.join(name)))
        };

        let caches = Caches::new(config.geocode_ttl);
        let kakao = Arc::new(KakaoLocal::new(&config.kakao_rest_key)?);

        let reverse = ReverseGeocodeCache::new(
            bucket(REVERSE_GEOCODE_BUCKET),
            kakao.clone(),
            Arc::new(RegionTable),
            caches.tiles,
            config.geocode_ttl,
        );
        let forward = AddressGeocodeCache::new(
            bucket(GEOCODE_BUCKET),
            kakao,
            caches.addresses,
            config.geocode_ttl,
        );

        let mut loaders = HashMap::new();
        let mut details = HashMap::new();
        for domain in Domain::ALL {
            let source: Arc<dyn FacilitySource> = match domain {
                Domain::Kindergarten => {
                    Arc::new(KindergartenRegistry::new(&config.kindergarten_api_key)?)
                }
                Domain::Childcare => Arc::new(ChildcarePortal::new(
                    &config.childcare_function_url,
                    &config.childcare_function_key,
                )?),
                Domain::Playground => Arc::new(PlaygroundRegistry::new(
                    &config.playground_api_url,
                    &config.playground_api_key,
                )?),
            };

            let store = SnapshotStore::new(domain, bucket(&domain.bucket()), config.snapshot_ttl);
            loaders.insert(domain, Arc::new(SmartLoader::new(store, source)));
            details.insert(
                domain,
                DetailStore::new(domain, bucket(&domain.detail_bucket()), config.detail_ttl),
            );
        }

        Ok(AppState::new(config, reverse, forward, loaders, details))
    }

    pub fn loader(&self, domain: Domain) -> Option<&Arc<SmartLoader>> {
        self.loaders.get(&domain)
    }

    pub fn detail_store(&self, domain: Domain) -> Option<&DetailStore> {
        self.details.get(&domain)
    }
}
