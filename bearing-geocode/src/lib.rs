mod nominatim;
mod server;

pub use nominatim::NominatimResolver;
pub use server::GEOCODER_HTTP_URL;
