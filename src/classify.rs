use std::fmt;

/// Values decoded from one person record. MEPS codes are numeric, negative values are reserve codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attributes {
    pub insurance: f64,           // PEGJAyy, 1 = covered by ESI
    pub dob_year: f64,            // DOBYY
    pub sex: f64,                 // 1 = male, 2 = female
    pub region: f64,              // REGIONyy, 1..4 census regions
    pub employment_relation: f64, // HPEJAyy, 1 = policy holder, 2 = dependent
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    NotInsured,
    UnknownSex,
    TooOld,
    TooYoung,
    RegionMissing,
    EmploymentRelationInapplicable,
    OutOfRange,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Exclusion::NotInsured => write!(f, "not ESI covered"),
            Exclusion::UnknownSex => write!(f, "sex not ascertained"),
            Exclusion::TooOld => write!(f, "65 or older"),
            Exclusion::TooYoung => write!(f, "under 18"),
            Exclusion::RegionMissing => write!(f, "region not ascertained"),
            Exclusion::EmploymentRelationInapplicable => write!(f, "employment relation inapplicable"),
            Exclusion::OutOfRange => write!(f, "code outside known range"),
        }
    }
}

/// Characteristics packed into a stratum number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub female: u8, // 1 = female, 0 = male
    pub emprel: u8, // 1 = dependent, 0 = policy holder
    pub age: u8,    // 1 = 45 to 64, 0 = 18 to 44
    pub region: u8, // 0 = NE, 1 = NC, 2 = S, 3 = W
}

/// One of the 32 ESI strata, numbered 1..=32. Stratum 0 holds everyone else and is never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stratum(u8);

impl Stratum {
    pub fn new(index: u8) -> Option<Stratum> {
        if (1..=32).contains(&index) {
            Some(Stratum(index))
        } else {
            None
        }
    }

    pub fn encode(profile: Profile) -> Option<Stratum> {
        let Profile { female, emprel, age, region } = profile;
        if female > 1 || emprel > 1 || age > 1 || region > 3 {
            return None;
        }
        Some(Stratum(1 + female + 2 * emprel + 4 * age + 8 * region))
    }

    pub fn decode(self) -> Profile {
        let key = self.0 - 1;
        Profile {
            female: key % 2,
            emprel: key / 2 % 2,
            age: key / 4 % 2,
            region: key / 8,
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Assigns a record to an ESI stratum.
///
/// The checks run in a fixed order and the first failure decides the exclusion. Region and
/// employment relation are tested on the raw code and normalized afterwards.
pub fn classify(attributes: &Attributes, reference_year: i32) -> Result<Stratum, Exclusion> {
    if attributes.insurance != 1.0 {
        return Err(Exclusion::NotInsured);
    }

    if attributes.sex != 1.0 && attributes.sex != 2.0 {
        return Err(Exclusion::UnknownSex);
    }
    let female = attributes.sex - 1.0;

    let too_old = f64::from(reference_year - 65);
    let older_cohort = f64::from(reference_year + 3 - 45);
    let adult = f64::from(reference_year + 3 - 18);
    let age = if attributes.dob_year < too_old {
        return Err(Exclusion::TooOld);
    } else if attributes.dob_year < older_cohort {
        1.0
    } else if attributes.dob_year < adult {
        0.0
    } else {
        return Err(Exclusion::TooYoung);
    };

    if attributes.region < 0.0 {
        return Err(Exclusion::RegionMissing);
    }
    let region = attributes.region - 1.0;

    if attributes.employment_relation == -1.0 {
        return Err(Exclusion::EmploymentRelationInapplicable);
    }
    let emprel = attributes.employment_relation - 1.0;

    // other reserve codes (-7, -8, -9) and region 0 survive the raw checks
    let profile = Profile {
        female: to_code(female, 1)?,
        emprel: to_code(emprel, 1)?,
        age: to_code(age, 1)?,
        region: to_code(region, 3)?,
    };

    Stratum::encode(profile).ok_or(Exclusion::OutOfRange)
}

fn to_code(value: f64, max: u8) -> Result<u8, Exclusion> {
    if value.fract() == 0.0 && value >= 0.0 && value <= f64::from(max) {
        Ok(value as u8)
    } else {
        Err(Exclusion::OutOfRange)
    }
}

#[cfg(test)]
fn person(insurance: f64, sex: f64, dob_year: f64, region: f64, employment_relation: f64) -> Attributes {
    Attributes {
        insurance,
        dob_year,
        sex,
        region,
        employment_relation,
        weight: 1500.0,
    }
}

#[test]
fn test_female_dependent_example() {
    let result = classify(&person(1.0, 2.0, 1980.0, 2.0, 1.0), 2009);
    assert_eq!(result, Ok(Stratum(10)));
    assert_eq!(
        Stratum(10).decode(),
        Profile { female: 1, emprel: 0, age: 0, region: 1 }
    );
}

#[test]
fn test_emprel_checked_before_normalizing() {
    // raw 0 passes the inapplicable check but normalizes to -1
    assert_eq!(classify(&person(1.0, 2.0, 1980.0, 2.0, 0.0), 2009), Err(Exclusion::OutOfRange));
    assert_eq!(
        classify(&person(1.0, 2.0, 1980.0, 2.0, -1.0), 2009),
        Err(Exclusion::EmploymentRelationInapplicable)
    );
    assert_eq!(classify(&person(1.0, 2.0, 1980.0, 2.0, -8.0), 2009), Err(Exclusion::OutOfRange));
    assert_eq!(classify(&person(1.0, 2.0, 1980.0, 2.0, 2.0), 2009), Ok(Stratum(12)));
}

#[test]
fn test_region_checked_before_normalizing() {
    assert_eq!(classify(&person(1.0, 1.0, 1980.0, -1.0, 1.0), 2009), Err(Exclusion::RegionMissing));
    assert_eq!(classify(&person(1.0, 1.0, 1980.0, 0.0, 1.0), 2009), Err(Exclusion::OutOfRange));
    assert_eq!(classify(&person(1.0, 1.0, 1980.0, 1.0, 1.0), 2009), Ok(Stratum(1)));
    assert_eq!(classify(&person(1.0, 1.0, 1980.0, 4.0, 1.0), 2009), Ok(Stratum(25)));
    assert_eq!(classify(&person(1.0, 1.0, 1980.0, 5.0, 1.0), 2009), Err(Exclusion::OutOfRange));
}

#[test]
fn test_not_insured() {
    for insurance in &[2.0, 0.0, -1.0] {
        assert_eq!(classify(&person(*insurance, 2.0, 1980.0, 2.0, 1.0), 2009), Err(Exclusion::NotInsured));
    }
}

#[test]
fn test_age_bands() {
    // 2009: too old before 1944, older cohort before 1967, adult before 1994
    assert_eq!(classify(&person(1.0, 1.0, 1943.0, 1.0, 1.0), 2009), Err(Exclusion::TooOld));
    assert_eq!(classify(&person(1.0, 1.0, 1944.0, 1.0, 1.0), 2009), Ok(Stratum(5)));
    assert_eq!(classify(&person(1.0, 1.0, 1966.0, 1.0, 1.0), 2009), Ok(Stratum(5)));
    assert_eq!(classify(&person(1.0, 1.0, 1967.0, 1.0, 1.0), 2009), Ok(Stratum(1)));
    assert_eq!(classify(&person(1.0, 1.0, 1993.0, 1.0, 1.0), 2009), Ok(Stratum(1)));
    assert_eq!(classify(&person(1.0, 1.0, 1994.0, 1.0, 1.0), 2009), Err(Exclusion::TooYoung));

    // cutoffs move with the reference year
    assert_eq!(classify(&person(1.0, 1.0, 1944.0, 1.0, 1.0), 2012), Err(Exclusion::TooOld));
    assert_eq!(classify(&person(1.0, 1.0, 1996.0, 1.0, 1.0), 2012), Ok(Stratum(1)));
}

#[test]
fn test_sex_codes() {
    for sex in &[0.0, 9.0, -9.0] {
        assert_eq!(classify(&person(1.0, *sex, 1980.0, 1.0, 1.0), 2009), Err(Exclusion::UnknownSex));
    }
    assert_eq!(classify(&person(1.0, 1.0, 1980.0, 1.0, 1.0), 2009), Ok(Stratum(1)));
    assert_eq!(classify(&person(1.0, 2.0, 1980.0, 1.0, 1.0), 2009), Ok(Stratum(2)));
}

#[test]
fn test_classification_grid() {
    use std::collections::HashSet;

    let mut assigned = HashSet::new();
    for insurance in &[0.0, 1.0, 2.0] {
        for sex in &[0.0, 1.0, 2.0, 9.0] {
            for dob_year in &[1930.0, 1950.0, 1980.0, 2005.0] {
                for region in &[-1.0, 0.0, 1.0, 2.0, 3.0, 4.0] {
                    for emprel in &[-1.0, 0.0, 1.0, 2.0] {
                        let passes = *insurance == 1.0
                            && (*sex == 1.0 || *sex == 2.0)
                            && (*dob_year == 1950.0 || *dob_year == 1980.0)
                            && *region >= 1.0
                            && *emprel >= 1.0;

                        match classify(&person(*insurance, *sex, *dob_year, *region, *emprel), 2009) {
                            Ok(stratum) => {
                                assert!(passes);
                                assert!((1..=32).contains(&stratum.index()));
                                assert!(assigned.insert(stratum), "stratum {:?} assigned twice", stratum);
                            }
                            Err(_) => assert!(!passes),
                        }
                    }
                }
            }
        }
    }

    // every combination of the four attributes reached a distinct stratum
    assert_eq!(assigned.len(), 32);
}

#[test]
fn test_stratum_round_trip() {
    for index in 1..=32 {
        let stratum = Stratum::new(index).unwrap();
        assert_eq!(Stratum::encode(stratum.decode()), Some(stratum));
    }
    assert_eq!(Stratum::new(0), None);
    assert_eq!(Stratum::new(33), None);
    assert_eq!(Stratum::encode(Profile { female: 0, emprel: 0, age: 0, region: 4 }), None);
}
